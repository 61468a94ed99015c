fn main() -> Result<(), Box<dyn std::error::Error>> {
    let descriptors = protox::compile(
        ["proto/envoy/service/ext_proc/v3/external_processor.proto"],
        ["proto"],
    )?;
    tonic_build::configure().compile_fds(descriptors)?;

    // prost-build names generated files after the sanitized (raw-identifier-escaped)
    // module path, so the "type" package segment produces `envoy.r#type.v3.rs` on
    // disk. `tonic::include_proto!("envoy.type.v3")` expects the literal package
    // name as the filename, so rename the file to match what the macro looks up.
    let out_dir = std::env::var("OUT_DIR")?;
    let escaped = std::path::Path::new(&out_dir).join("envoy.r#type.v3.rs");
    let expected = std::path::Path::new(&out_dir).join("envoy.type.v3.rs");
    if escaped.exists() {
        std::fs::rename(escaped, expected)?;
    }

    println!("cargo:rerun-if-changed=proto");
    Ok(())
}
