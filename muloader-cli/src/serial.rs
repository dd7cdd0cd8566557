//! Interactive serial port selection.
//!
//! Ports come from the command line, the config file, or enumeration. When
//! enumeration finds several candidates the user picks one with dialoguer;
//! non-interactive mode never prompts.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, info, warn},
    muloader::{PortInfo, list_ports},
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI or environment.
    pub port: Option<String>,
    /// Offer all ports, not just recognised USB bridges.
    pub list_all_ports: bool,
    /// Non-interactive mode (fail instead of prompting).
    pub non_interactive: bool,
}

/// Result of port selection.
pub struct SelectedPort {
    /// The selected port info.
    pub port: PortInfo,
    /// Whether the user picked the port from a prompt.
    pub prompted: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn cancelled() -> anyhow::Error {
    CliError::Cancelled("Port selection cancelled".to_string()).into()
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name));
    }

    if let Some(port_name) = &config.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name));
    }

    let ports = discover_ports();
    if ports.is_empty() {
        return Err(CliError::NotFound("No serial ports found".to_string()).into());
    }

    let known_ports: Vec<PortInfo> = ports
        .iter()
        .filter(|p| p.device.is_known())
        .cloned()
        .collect();

    let selection_ports = if options.list_all_ports || known_ports.is_empty() {
        ports
    } else {
        known_ports
    };

    if options.non_interactive {
        return select_non_interactive_port(selection_ports);
    }

    match selection_ports.len().cmp(&1) {
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(selection_ports)
        },
        Ordering::Equal => {
            let Some(port) = selection_ports.into_iter().next() else {
                return Err(usage_err("No serial ports available"));
            };
            if port.device.is_known() {
                info!("Auto-selected port: {} [{}]", port.name, port.device.name());
                Ok(SelectedPort {
                    port,
                    prompted: false,
                })
            } else {
                ensure_interactive_terminal()?;
                confirm_single_port(port)
            }
        },
        Ordering::Less => Err(usage_err("No serial ports available")),
    }
}

/// Enumerate ports; enumeration failures read as "no ports".
pub fn discover_ports() -> Vec<PortInfo> {
    match list_ports() {
        Ok(ports) => ports,
        Err(e) => {
            warn!("Failed to enumerate serial ports: {e}");
            Vec::new()
        },
    }
}

fn select_non_interactive_port(selection_ports: Vec<PortInfo>) -> Result<SelectedPort> {
    match selection_ports.len().cmp(&1) {
        Ordering::Equal => {
            let Some(port) = selection_ports.into_iter().next() else {
                return Err(usage_err("No serial ports available"));
            };
            Ok(SelectedPort {
                port,
                prompted: false,
            })
        },
        Ordering::Greater => Err(usage_err(
            "Found multiple serial ports; specify one with --port",
        )),
        Ordering::Less => Err(CliError::NotFound("No serial ports available".to_string()).into()),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs a terminal; use --port or --non-interactive",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                cancelled()
            } else {
                usage_err("Interactive prompt failed")
            }
        },
    }
}

/// Find a port by name, falling back to an unlisted entry.
fn find_port_by_name(name: &str) -> SelectedPort {
    let ports = discover_ports();

    let port = ports
        .iter()
        .find(|p| p.name == name)
        .or_else(|| ports.iter().find(|p| p.name.eq_ignore_ascii_case(name)))
        .cloned()
        .unwrap_or_else(|| PortInfo::unlisted(name));

    SelectedPort {
        port,
        prompted: false,
    }
}

/// One-line label for a port in prompts and listings.
pub fn port_label(port: &PortInfo) -> String {
    let device_info = if port.device.is_known() {
        format!(" [{}]", style(port.device.name()).yellow())
    } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{}{device_info}{product}", port.name)
}

fn select_port_interactive(mut ports: Vec<PortInfo>) -> Result<SelectedPort> {
    eprintln!("{} Found {} serial ports", style("ℹ").blue(), ports.len());

    ports.sort_by_key(|p| !p.device.is_known());

    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&port_label(p), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the tag writer's serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            Ok(SelectedPort {
                port,
                prompted: true,
            })
        },
        None => Err(cancelled()),
    }
}

fn confirm_single_port(port: PortInfo) -> Result<SelectedPort> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}?", port_label(&port)))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort {
            port,
            prompted: true,
        })
    } else {
        Err(cancelled())
    }
}

/// Offer to save a prompted choice in the local config file.
pub fn ask_remember_port(port: &PortInfo, config: &mut Config) -> Result<()> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember {} for future uploads?", port.name))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_port(&port.name) {
            warn!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}
