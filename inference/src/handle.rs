//! Owning wrappers for native handles, one type per resource kind.

use std::fmt;
use std::sync::Arc;

use crate::error::InferenceError;
use crate::runtime::{RawHandle, Runtime};

macro_rules! native_handle {
    ($(#[$meta:meta])* $name:ident => $release:ident) => {
        $(#[$meta])*
        pub struct $name {
            raw: Option<RawHandle>,
            runtime: Arc<dyn Runtime>,
        }

        impl $name {
            /// Takes ownership of `raw`; it is released when the wrapper is.
            pub fn from_raw(runtime: Arc<dyn Runtime>, raw: RawHandle) -> Self {
                Self {
                    raw: Some(raw),
                    runtime,
                }
            }

            /// Returns the raw handle, or `Released` once it has been released.
            pub fn get(&self) -> Result<RawHandle, InferenceError> {
                self.raw.ok_or(InferenceError::Released)
            }

            pub fn is_released(&self) -> bool {
                self.raw.is_none()
            }

            pub fn runtime(&self) -> &Arc<dyn Runtime> {
                &self.runtime
            }

            /// Releases the native object. Returns false if it was already
            /// released.
            pub fn release(&mut self) -> bool {
                match self.raw.take() {
                    Some(raw) => {
                        self.runtime.$release(raw);
                        true
                    }
                    None => false,
                }
            }

            /// Gives up ownership without releasing.
            pub fn into_raw(mut self) -> Option<RawHandle> {
                self.raw.take()
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                self.release();
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.raw).finish()
            }
        }
    };
}

native_handle! {
    /// Process-wide engine environment.
    EnvHandle => release_env
}

native_handle! {
    /// A loaded model.
    SessionHandle => release_session
}

native_handle! {
    /// A tensor or other value, input or output.
    ValueHandle => release_value
}

native_handle! {
    /// Type information for a session input or output.
    TypeInfoHandle => release_type_info
}

native_handle! {
    /// Owned tensor type-and-shape information of a value.
    TensorInfoHandle => release_tensor_info
}

native_handle! {
    RunOptionsHandle => release_run_options
}
