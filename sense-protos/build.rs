fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Fall back to the bundled protoc when the host has none installed
    if std::env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path().map_err(|e| e.to_string())?;
        std::env::set_var("PROTOC", protoc);
    }

    tonic_build::compile_protos("proto/cochlear_sense.proto")?;

    // Ensure we rebuild when proto files change
    println!("cargo:rerun-if-changed=proto/cochlear_sense.proto");

    Ok(())
}
