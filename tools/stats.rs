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
        recover: RecoverMode::None,
        may_create: false,
        upgrade: UpgradePolicy::Forbid,
    };
    let catalog = Catalog::open(config, &db_path, open)?;
    for line in catalog.stats()? {
        println!("{}", line);
    }
    Ok(())
}
