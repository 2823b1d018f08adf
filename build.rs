//! Generated protobuf code is checked in under `src/generated`.
//! Set `GRPCWATCH_REGEN_PROTO=1` (requires `protoc`) to regenerate it.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-env-changed=GRPCWATCH_REGEN_PROTO");
    println!("cargo:rerun-if-changed=proto/watch_service.proto");

    if std::env::var_os("GRPCWATCH_REGEN_PROTO").is_none() {
        return Ok(());
    }

    tonic_build::configure()
        .out_dir("src/generated")
        .type_attribute(".", "#[derive(serde::Serialize, serde::Deserialize)]")
        .type_attribute("watchpb.Subject", "#[derive(Eq, Hash)]")
        .type_attribute("watchpb.Endpoint", "#[derive(Eq, Hash)]")
        .compile_protos(&["proto/watch_service.proto"], &["."])
        .unwrap_or_else(|e| panic!("protobuf compile error: {e}"));

    Ok(())
}
