fn main() -> anyhow::Result<()> {
    s3chunk::cli::run()
}
