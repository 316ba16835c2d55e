use anyhow::Result;
use opboundary::output;
use opboundary::scan::Scan;
use opboundary::settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "opboundary=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let settings = settings::load_config()?;
    let scan = Scan::new(&settings)?;

    let result = scan.run();
    println!("{}", result.tally);
    output::writeup(&settings, &result)?;

    Ok(())
}
