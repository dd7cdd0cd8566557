//! List ports command implementation.

use anyhow::Result;
use console::style;

use crate::serial::{discover_ports, port_label};

/// List serial ports, as text on stderr or JSON on stdout.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = discover_ports();

    if json {
        let entries: Vec<serde_json::Value> = ports
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "device": p.device.name(),
                    "known": p.device.is_known(),
                    "vid": p.vid,
                    "pid": p.pid,
                    "manufacturer": p.manufacturer,
                    "product": p.product,
                    "serial": p.serial_number,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &ports {
        eprintln!("  {} {}", style("•").green(), port_label(port));
    }

    let known: Vec<_> = ports.iter().filter(|p| p.device.is_known()).collect();
    if let [only] = known.as_slice() {
        eprintln!(
            "\n{} Auto-detected: {}",
            style("→").green().bold(),
            style(&only.name).cyan().bold()
        );
    }

    Ok(())
}
