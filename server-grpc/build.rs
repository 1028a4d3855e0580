use std::error::Error;
use std::{env, path::PathBuf};
use tonic_prost_build::configure;

fn main() -> Result<(), Box<dyn Error>> {
    if env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path()
            .map_err(|e| format!("no protoc on PATH and vendored protoc unavailable: {e}"))?;
        // SAFETY: nothing else runs in the build script yet.
        unsafe { env::set_var("PROTOC", protoc) };
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);

    configure()
        .file_descriptor_set_path(out_dir.join("thumbnail_descriptor.bin"))
        .compile_protos(&["proto/thumbnail.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/thumbnail.proto");
    Ok(())
}
