fn main() -> anyhow::Result<()> {
    agentboard::run()?;
    Ok(())
}
