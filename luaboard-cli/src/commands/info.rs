//! Board info and port listing command implementations.

use {
    crate::{Cli, attach_board, config::Config, human_sink},
    anyhow::Result,
    console::style,
    luaboard::{BoardInfo, detect_ports, select_port},
};

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = detect_ports();

    if json {
        let ports: Vec<serde_json::Value> = detected
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
                    "serial": p.serial,
                })
            })
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": ports,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!(
        "{}",
        style("Available serial ports:")
            .bold()
            .underlined()
    );

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &detected {
        let device_type = if port
            .device
            .is_known()
        {
            format!(
                " [{}]",
                style(
                    port.device
                        .name()
                )
                .yellow()
            )
        } else {
            String::new()
        };

        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };

        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{device_type}{vid_pid}{product}",
            style("•").green(),
            style(&port.name).cyan(),
        );
    }

    if let Some(best) = select_port(&detected) {
        eprintln!(
            "\n{} Auto-detected: {}",
            style("→")
                .green()
                .bold(),
            style(&best.name)
                .cyan()
                .bold()
        );
    }

    Ok(())
}

/// What `info` reports about an attached board.
struct Report {
    device: String,
    info: Option<BoardInfo>,
    raw: String,
    new_build: bool,
}

/// Info command implementation.
pub(crate) fn cmd_info(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let sink = human_sink(cli);
    let host = attach_board(cli, config, sink)?;
    let report = host.with_board(|board| {
        Ok(Report {
            device: board
                .device()
                .to_string(),
            info: board
                .info()
                .cloned(),
            raw: board
                .info_text()
                .to_string(),
            new_build: board.new_build(),
        })
    })?;
    host.detach();

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "port": report.device,
                "info": report.info,
                "model": report.info.as_ref().map(|i| i.model().to_string()),
                "new_build": report.new_build,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let Some(info) = &report.info else {
        eprintln!(
            "{} Board on {} did not report valid info",
            style("⚠").yellow(),
            report.device
        );
        if !report
            .raw
            .is_empty()
        {
            eprintln!("  {}", style(&report.raw).dim());
        }
        return Ok(());
    };

    println!("Port:    {}", report.device);
    println!("Board:   {}", info.model());
    println!("Build:   {}", info.build);
    println!("Commit:  {}", info.commit);

    if report.new_build && !cli.quiet {
        eprintln!(
            "\n{} New firmware available; run {} to install it",
            style("ℹ").blue(),
            style("luaboard upgrade").cyan()
        );
    }

    Ok(())
}
