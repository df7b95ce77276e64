fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Fall back to the bundled protoc when the environment does not provide one.
    if std::env::var_os("PROTOC").is_none() {
        // SAFETY: the build script is single-threaded here.
        unsafe { std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?) };
    }
    let well_known = protoc_bin_vendored::include_path()?;

    println!("cargo:rerun-if-changed=proto/client.proto");

    tonic_build::configure()
        .build_client(true)
        .build_server(true) // The fake controller in the test suite implements it
        .compile_protos(
            &["proto/client.proto"],
            &[std::path::Path::new("proto/"), well_known.as_path()],
        )?;
    Ok(())
}
