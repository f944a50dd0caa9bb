fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let proto_file = "proto/chatrelay.proto";
    let proto_dir = "proto";

    println!("cargo:rerun-if-changed={proto_file}");

    if !std::path::Path::new(proto_file).exists() {
        return Err(format!(
            "proto file not found at '{proto_file}' \
             (cwd: {:?}). Ensure chatrelay-protocol/proto/chatrelay.proto exists.",
            std::env::current_dir().unwrap_or_default(),
        )
        .into());
    }

    // Prefer a system protoc when one is configured.
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&[proto_file], &[proto_dir])?;

    Ok(())
}
