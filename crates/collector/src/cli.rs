use anyhow::Result;
use common::db::{self, Database};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the daily collector. Positional hour/minute override the config
    /// schedule when present; `--run-now` forces one immediate run.
    Run {
        hour: Option<u32>,
        minute: Option<u32>,
        run_now: bool,
    },
    Stats,
    Latest {
        limit: u32,
    },
}

pub fn parse_args<I>(mut args: I) -> std::result::Result<Command, String>
where
    I: Iterator<Item = String>,
{
    // Drop argv[0].
    let _ = args.next();

    let mut positional: Vec<u32> = Vec::new();
    let mut run_now = false;
    let mut first = true;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "stats" if first => return Ok(Command::Stats),
            "latest" if first => {
                let limit = match args.next() {
                    Some(n) => n
                        .parse::<u32>()
                        .map_err(|e| format!("invalid limit {n:?}: {e}"))?,
                    None => 10,
                };
                return Ok(Command::Latest { limit });
            }
            "--run-now" => run_now = true,
            other => {
                let n = other.parse::<u32>().map_err(|e| {
                    format!("expected HOUR/MINUTE number or --run-now, got {other:?}: {e}")
                })?;
                if positional.len() == 2 {
                    return Err("too many positional arguments (expected HOUR MINUTE)".to_string());
                }
                positional.push(n);
            }
        }
        first = false;
    }

    let hour = positional.first().copied();
    let minute = positional.get(1).copied();
    if let Some(h) = hour {
        if h > 23 {
            return Err(format!("hour out of range 0-23: {h}"));
        }
    }
    if let Some(m) = minute {
        if m > 59 {
            return Err(format!("minute out of range 0-59: {m}"));
        }
    }

    Ok(Command::Run {
        hour,
        minute,
        run_now,
    })
}

pub fn run_command(db: &Database, cmd: Command) -> Result<()> {
    match cmd {
        Command::Run { .. } => Ok(()),
        Command::Stats => show_stats(db),
        Command::Latest { limit } => show_latest(db, limit),
    }
}

fn show_stats(db: &Database) -> Result<()> {
    let stats = db::query_stats(&db.conn)?;
    println!("Smart money store:");
    println!("  wallets          {}", stats.total_wallets);
    println!("  avg smart score  {:.4}", stats.avg_smart_money_score);
    println!("  avg efficiency   {:.4}", stats.avg_efficiency_ratio);
    Ok(())
}

fn show_latest(db: &Database, limit: u32) -> Result<()> {
    println!("Most recently merged wallets:");
    for r in db::query_latest(&db.conn, limit)? {
        println!(
            "{}  tag={}  swaps={}  volume={:.4}  eff={:.3}  updated_at={}",
            r.wallet_address, r.tag, r.swap_count, r.total_volume, r.efficiency_ratio, r.updated_at
        );
    }
    Ok(())
}
