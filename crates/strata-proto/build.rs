// Build script to compile the protobuf service definition into Rust code.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    tonic_build::compile_protos("proto/strata.proto")?;
    Ok(())
}
