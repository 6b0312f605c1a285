//! `addontrace version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs {
    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.json {
        let info = serde_json::json!({
            "name": "addontrace",
            "version": addontrace_core::VERSION,
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("addontrace version {}", addontrace_core::VERSION);
    }
    Ok(())
}
