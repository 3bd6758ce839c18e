//! pilinks binary entry point.

use anyhow::Context as _;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments and call into the library's run function
    pilinks::run().await.context("failed to run application")
}
