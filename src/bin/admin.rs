use std::collections::VecDeque;

use rfid_ledger::domain::{ScanStatus, TagCode};
use rfid_ledger::infra::{connect_ledger, LedgerHandles};

const DEFAULT_DATABASE_URL: &str = "sqlite://rfid_ledger.db?mode=rwc";

fn print_help() {
    eprintln!(
        "\
rfid-ledger-admin

USAGE:
  rfid-ledger-admin <command> [options]

COMMANDS:
  migrate                         Run database migrations
  register <tag>...               Register tags (idempotent)
  list                            List scan records, newest first
  set-status                      Overwrite the status of one record
  delete                          Delete one record

COMMON OPTIONS:
  --database-url <url>            (defaults to env DATABASE_URL, then {DEFAULT_DATABASE_URL})

list OPTIONS:
  --tag <tag>                     (optional) Only records for this tag
  --limit <n>                     (optional) Maximum records to print

set-status OPTIONS:
  --id <n>                        (required) Record id
  --status <0|1>                  (required) New status

delete OPTIONS:
  --id <n>                        (required) Record id
"
    );
}

fn resolve_database_url(database_url: Option<String>) -> String {
    database_url
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string())
}

async fn open_ledger(database_url: Option<String>, migrate: bool) -> anyhow::Result<LedgerHandles> {
    let database_url = resolve_database_url(database_url);
    Ok(connect_ledger(&database_url, 5, migrate).await?)
}

fn next_value(args: &mut VecDeque<String>, flag: &str) -> anyhow::Result<String> {
    args.pop_front()
        .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args: VecDeque<String> = std::env::args().skip(1).collect();
    let Some(command) = args.pop_front() else {
        print_help();
        return Ok(());
    };

    if matches!(command.as_str(), "-h" | "--help" | "help") {
        print_help();
        return Ok(());
    }

    match command.as_str() {
        "migrate" => {
            let mut database_url: Option<String> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => {
                        database_url = Some(next_value(&mut args, "--database-url")?);
                    }
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            open_ledger(database_url, true).await?;
            println!("ok: migrations applied");
            Ok(())
        }
        "register" => {
            let mut database_url: Option<String> = None;
            let mut tags: Vec<TagCode> = Vec::new();
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => {
                        database_url = Some(next_value(&mut args, "--database-url")?);
                    }
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    flag if flag.starts_with("--") => {
                        anyhow::bail!("unexpected argument: {flag}")
                    }
                    raw => {
                        let tag = TagCode::parse(raw)
                            .map_err(|e| anyhow::anyhow!("invalid tag {raw:?}: {e}"))?;
                        tags.push(tag);
                    }
                }
            }

            if tags.is_empty() {
                anyhow::bail!("register requires at least one tag");
            }

            let ledger = open_ledger(database_url, false).await?;
            for tag in &tags {
                match ledger.admin.register(tag).await? {
                    Some(record) => println!("ok: registered {tag} (id={})", record.id),
                    None => println!("ok: {tag} already registered"),
                }
            }
            Ok(())
        }
        "list" => {
            let mut database_url: Option<String> = None;
            let mut tag: Option<String> = None;
            let mut limit: Option<usize> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => {
                        database_url = Some(next_value(&mut args, "--database-url")?);
                    }
                    "--tag" => {
                        let raw = next_value(&mut args, "--tag")?;
                        let parsed = TagCode::parse(&raw)
                            .map_err(|e| anyhow::anyhow!("invalid tag {raw:?}: {e}"))?;
                        tag = Some(parsed.into_inner());
                    }
                    "--limit" => {
                        limit = Some(next_value(&mut args, "--limit")?.parse()?);
                    }
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let ledger = open_ledger(database_url, false).await?;
            let records = ledger
                .admin
                .list()
                .await?
                .into_iter()
                .filter(|r| tag.as_deref().map_or(true, |t| r.rfid_number == t))
                .take(limit.unwrap_or(usize::MAX));

            println!(
                "{:>8}  {:<16}  {:>6}  {:>10}  created_at",
                "id", "rfid_number", "status", "registered"
            );
            for record in records {
                println!(
                    "{:>8}  {:<16}  {:>6}  {:>10}  {}",
                    record.id,
                    record.rfid_number,
                    record.status.as_payload(),
                    record.registered,
                    record.created_at.to_rfc3339()
                );
            }
            Ok(())
        }
        "set-status" => {
            let mut database_url: Option<String> = None;
            let mut id: Option<i64> = None;
            let mut status: Option<ScanStatus> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => {
                        database_url = Some(next_value(&mut args, "--database-url")?);
                    }
                    "--id" => {
                        id = Some(next_value(&mut args, "--id")?.parse()?);
                    }
                    "--status" => {
                        let raw: i64 = next_value(&mut args, "--status")?.parse()?;
                        status = Some(
                            ScanStatus::from_i64(raw)
                                .ok_or_else(|| anyhow::anyhow!("--status must be 0 or 1"))?,
                        );
                    }
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let id = id.ok_or_else(|| anyhow::anyhow!("--id is required"))?;
            let status = status.ok_or_else(|| anyhow::anyhow!("--status is required"))?;

            let ledger = open_ledger(database_url, false).await?;
            let record = ledger.admin.update_status(id, status).await?;
            println!(
                "ok: id={} rfid_number={} status={}",
                record.id, record.rfid_number, record.status
            );
            Ok(())
        }
        "delete" => {
            let mut database_url: Option<String> = None;
            let mut id: Option<i64> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => {
                        database_url = Some(next_value(&mut args, "--database-url")?);
                    }
                    "--id" => {
                        id = Some(next_value(&mut args, "--id")?.parse()?);
                    }
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let id = id.ok_or_else(|| anyhow::anyhow!("--id is required"))?;

            let ledger = open_ledger(database_url, false).await?;
            ledger.admin.delete(id).await?;
            println!("ok: deleted id={id}");
            Ok(())
        }
        other => {
            eprintln!("unknown command: {other}\n");
            print_help();
            anyhow::bail!("unknown command: {other}");
        }
    }
}
