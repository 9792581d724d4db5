fn main() -> anyhow::Result<()> {
    sandterm::cli::run()
}
