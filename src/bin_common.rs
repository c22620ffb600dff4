use sma_rs::{BtAddress, Session, config::parse_date};

pub fn parse_bt_address(s: &str) -> Result<BtAddress, String> {
    s.trim().parse().map_err(|e: sma_rs::SmaError| e.to_string())
}

pub fn parse_date_arg(s: &str) -> Result<chrono::DateTime<chrono::Utc>, String> {
    parse_date(s).map_err(|e| e.to_string())
}

/// Seconds east of UTC, e.g. `3600` or `-18000`.
pub fn parse_offset(s: &str) -> Result<i32, String> {
    s.trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| e.to_string())
}

pub fn print_session(session: &Session) {
    println!("═══════════════════════════════════════════════════════════");
    println!(
        "Inverter {}  {}",
        session.destination,
        session.inverter_name.as_deref().unwrap_or("(unknown type)")
    );
    println!("═══════════════════════════════════════════════════════════");
    println!("  Serial: {}  Net ID: {:02x}", session.inverter_serial, session.net_id);
    if let Some(strength) = session.signal_strength {
        println!("  Signal: {:.1}%", strength);
    }
    if let Some(time) = session.inverter_time {
        let clock = chrono::DateTime::from_timestamp(time, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| time.to_string());
        println!("  Inverter clock: {} UTC", clock);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_parsers() {
        assert_eq!(
            parse_bt_address("00:80:25:1D:AC:53").unwrap().to_string(),
            "00:80:25:1D:AC:53"
        );
        assert!(parse_bt_address("00:80:25").is_err());
        assert!(parse_date_arg("2013-01-01 00:00:00").is_ok());
        assert_eq!(parse_offset("-18000"), Ok(-18_000));
    }
}
