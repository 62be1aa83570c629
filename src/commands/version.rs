pub fn run() -> anyhow::Result<()> {
    println!("sandbox-controller {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
