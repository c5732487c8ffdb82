mod scenarios;

use asyncgen::{run_event_loop, set_short_timer_threshold_ms, set_wait_for_active_handles, take_unhandled_rejections};

#[derive(clap::Parser)]
#[command(name = "agen", version, about = "Async generator scenario runner")]
struct Cli {
    /// Run only the named scenario
    #[arg(short, long)]
    scenario: Option<String>,

    /// List the scenario names and exit
    #[arg(short, long)]
    list: bool,

    /// Print every settled outcome as JSON
    #[arg(long)]
    json: bool,

    /// Keep the event loop alive while long timers are pending
    #[arg(long)]
    wait_for_timers: bool,

    /// Timers at or below this many milliseconds run on the loop thread
    #[arg(long, value_name = "MS")]
    timer_threshold_ms: Option<u64>,
}

fn main() -> Result<(), Box<dyn std::error::Error + 'static>> {
    // Initialize logger (controlled by RUST_LOG)
    env_logger::init();

    let cli = <Cli as clap::Parser>::parse();

    if cli.list {
        for scenario in scenarios::all() {
            println!("{}", scenario.name);
        }
        return Ok(());
    }

    if let Some(ms) = cli.timer_threshold_ms {
        set_short_timer_threshold_ms(ms);
    }
    set_wait_for_active_handles(cli.wait_for_timers);

    let selected: Vec<_> = scenarios::all()
        .into_iter()
        .filter(|s| cli.scenario.as_deref().is_none_or(|name| name == s.name))
        .collect();
    if selected.is_empty() {
        eprintln!("unknown scenario: {}", cli.scenario.unwrap_or_default());
        std::process::exit(2);
    }

    let mut checks = Vec::new();
    for scenario in &selected {
        log::info!("running scenario '{}'", scenario.name);
        checks.extend((scenario.run)()?);
    }
    run_event_loop()?;
    for check in &checks {
        check.settle()?;
    }

    let mut failures = 0usize;
    for check in &checks {
        if cli.json {
            println!("{}", check.to_json());
        }
        if let Err(message) = check.verify() {
            println!("{message}");
            failures += 1;
        }
    }

    let unhandled = take_unhandled_rejections();
    if !unhandled.is_empty() {
        log::warn!("{} rejection(s) were never handled", unhandled.len());
    }

    if failures > 0 {
        std::process::exit(1);
    }
    println!("pass");
    Ok(())
}
