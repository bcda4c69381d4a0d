//! Command line entry point of the key-value store stress tester.

fn main() -> anyhow::Result<()> {
    kvstress::cli::execute()
}
