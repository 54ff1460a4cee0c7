// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `system` command group: soft-reboot, serial.

use clap::{Args, Subcommand};

use integritykit_adb::DeviceTransport;
use integritykit_core::error::Result;

use super::connect;

#[derive(Subcommand)]
pub enum SystemCommand {
    /// Restart the Android UI without a full power cycle
    SoftReboot,
    /// Change the device serial number
    Serial(SerialArgs),
}

#[derive(Args)]
pub struct SerialArgs {
    /// Use this serial instead of generating a random one
    #[arg(long, value_name = "SERIAL")]
    set: Option<String>,
}

pub fn run(command: SystemCommand) -> Result<()> {
    let transport = connect()?;
    match command {
        SystemCommand::SoftReboot => {
            println!("Soft-rebooting: the screen will go black and the UI will restart.");
            transport.soft_reboot()?;
            println!("Command sent; ADB may disconnect briefly.");
            Ok(())
        }
        SystemCommand::Serial(args) => serial(&transport, args.set),
    }
}

fn serial(transport: &dyn DeviceTransport, requested: Option<String>) -> Result<()> {
    let serial = requested.unwrap_or_else(|| random_serial(16));
    println!("Setting device serial to {serial}...");

    transport.shell_su(&format!("resetprop ro.serialno {serial}"))?;
    transport.shell_su(&format!("resetprop ro.boot.serialno {serial}"))?;

    println!("Serial changed to {serial}. A full reboot is recommended so all apps see it.");
    Ok(())
}

/// Random-looking A–Z0–9 serial from a time-seeded multiplicative
/// generator; one value per invocation is all this needs.
fn random_serial(len: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut state = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5eed)
        | 1;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            CHARSET[((state >> 33) as usize) % CHARSET.len()] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use integritykit_adb::StubTransport;

    #[test]
    fn serial_sets_both_properties() {
        let t = StubTransport::new();
        serial(&t, Some("TESTSERIAL123".into())).unwrap();
        assert_eq!(t.prop("ro.serialno").as_deref(), Some("TESTSERIAL123"));
        assert_eq!(t.prop("ro.boot.serialno").as_deref(), Some("TESTSERIAL123"));
    }

    #[test]
    fn random_serial_shape() {
        let s = random_serial(16);
        assert_eq!(s.len(), 16);
        assert!(s.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }
}
