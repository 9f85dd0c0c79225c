use anyhow::Result;
use looma_scan::labels::{LabelConfig, LabelGenerator};
use std::io;
use tracing::info;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    looma_scan::init_tracing();

    let config = LabelConfig::from_env();
    info!(
        output = %config.output_dir.display(),
        base_url = %config.base_url,
        "🏷  QR label generator"
    );

    // Missing logo aborts here, before the first prompt.
    let generator = LabelGenerator::new(config)?;

    let stdin = io::stdin();
    generator.run(stdin.lock(), io::stdout())
}
