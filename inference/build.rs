use std::env;

fn main() {
    println!("cargo:rerun-if-changed=csrc/ort_shim.c");
    println!("cargo:rerun-if-env-changed=ORT_LIB_DIR");
    println!("cargo:rerun-if-env-changed=ORT_INCLUDE_DIR");

    if env::var_os("CARGO_FEATURE_ORT").is_none() {
        return;
    }

    if let Ok(dir) = env::var("ORT_LIB_DIR") {
        println!("cargo:rustc-link-search=native={dir}");
    }
    println!("cargo:rustc-link-lib=onnxruntime");

    let mut build = cc::Build::new();
    build.file("csrc/ort_shim.c");
    if let Ok(dir) = env::var("ORT_INCLUDE_DIR") {
        build.include(dir);
    }
    build.compile("ort_shim");
}
