// build.rs

use std::env;

fn main() {
    let version = env::var("MESHGATE_VERSION")
        .unwrap_or_else(|_| env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "dev".to_string()));

    println!("cargo:rustc-env=CARGO_PKG_VERSION={version}");
    println!("cargo:rerun-if-env-changed=MESHGATE_VERSION");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/authority.proto"], &["proto"])
        .expect("failed to compile authority.proto");
}
