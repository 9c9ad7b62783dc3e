//! `--info`: what is installed and what is available. Never changes anything.

use colored::Colorize;
use tracing::debug;

use crate::config::RunConfig;
use crate::install::InstallProbe;
use crate::release::{GithubReleases, ReleaseSource};

pub async fn execute(config: &RunConfig) {
    let description = InstallProbe::describe(&config.install_root);

    let latest = match GithubReleases::new(&config.settings.release, &config.settings.timeouts) {
        Ok(source) => source.fetch(&config.target).await,
        Err(e) => Err(e),
    };

    let installed = description.version.as_deref().map_or_else(
        || "unknown (no version marker)".yellow().to_string(),
        ToString::to_string,
    );
    let latest = match latest {
        Ok(release) => release.version.to_string(),
        Err(e) => {
            debug!("Release lookup failed: {:#}", e);
            format!("unavailable ({e})").yellow().to_string()
        }
    };
    let driver = match &description.database_driver {
        Ok(driver) => driver.to_string(),
        Err(reason) => format!("unknown ({reason})").yellow().to_string(),
    };
    let maintenance = if description.maintenance_active {
        "down (maintenance mode)".red().to_string()
    } else {
        "up".green().to_string()
    };

    println!("{}", "MunkiReport install".bold());
    println!("  Install path:      {}", description.root.display());
    println!("  Installed version: {installed}");
    println!("  Latest version:    {latest}");
    println!("  Flavor:            {}", description.flavor);
    println!("  Database driver:   {driver}");
    println!("  Site status:       {maintenance}");
}
