use trackdb::{Catalog, OpenOptions, RecoverMode, UpgradePolicy};

mod args;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let options = args::parse()?;
    args::init_logging(options.debug);
    if let Some(extra) = options.args.first() {
        return Err(format!("unexpected argument {}", extra).into());
    }

    let config = args::load_config(&options.config_path)?;
    let db_path = config.db_path(&options.config_path);
    let open = OpenOptions {
        recover: RecoverMode::Normal,
        may_create: false,
        upgrade: UpgradePolicy::ForUpgrade,
    };
    let catalog = Catalog::open(config, &db_path, open)?;
    let report = catalog.upgrade()?;
    println!(
        "Upgraded: {} tracks, {} preference records, {} aliases dropped",
        report.tracks, report.prefs, report.aliases_dropped
    );
    Ok(())
}
