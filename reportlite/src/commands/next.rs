//! `reportlite next`: preview upcoming trigger instants.

use anyhow::Result;
use chrono::Local;
use reportlite_envelope::schedule::{upcoming, CronTrigger, Trigger};

pub fn cmd_next(count: usize) -> Result<()> {
    let trigger = CronTrigger::monthly_report()?;
    let now = Local::now();
    eprintln!("⏰ Next {} run(s) for {}:", count, trigger.describe());
    for at in upcoming(&trigger, &now, count) {
        println!("{}", at.to_rfc3339());
    }
    Ok(())
}
