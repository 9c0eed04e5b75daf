//! Command execution.

use crate::Commands;
use colored::Colorize;
use procrpc_client::Client;

/// Executes a command and returns the formatted output.
pub fn execute(client: &mut Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Ping => {
            client.ping_demo()?;
            Ok("PONG".green().to_string())
        }

        Commands::Echo { text } => Ok(client.echo(&text)?),

        Commands::Info => {
            let info = client.info()?;
            Ok(format!(
                "{}\n  Version: {}\n  Uptime: {}",
                info.name.cyan().bold(),
                info.version,
                format_uptime(info.uptime_secs)
            ))
        }
    }
}

/// Formats seconds as a short human-readable duration.
fn format_uptime(secs: u64) -> String {
    let (days, rem) = (secs / 86_400, secs % 86_400);
    let (hours, rem) = (rem / 3600, rem % 3600);
    let (mins, secs) = (rem / 60, rem % 60);
    if days > 0 {
        format!("{}d {}h {}m", days, hours, mins)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(0), "0s");
        assert_eq!(format_uptime(61), "1m 1s");
        assert_eq!(format_uptime(3 * 3600 + 5), "3h 0m 5s");
        assert_eq!(format_uptime(2 * 86_400 + 3600 + 120), "2d 1h 2m");
    }
}
