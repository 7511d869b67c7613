fn main() {
    // Vendored protoc for reproducible builds
    let protoc = protoc_bin_vendored::protoc_bin_path().expect("protoc");
    std::env::set_var("PROTOC", &protoc);

    println!("cargo:rerun-if-changed=proto/obsidian.proto");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/obsidian.proto"], &["proto"])
        .expect("compile protos");
}
