use anyhow::Result;
use clap::Parser;
use taskctx::cli::{Cli, Commands};
use taskctx::commands;
use taskctx::infra::telemetry;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Build a context once, pass everywhere
    let ctx = cli.app_context();
    telemetry::init(ctx.verbose, ctx.no_color);

    match cli.command {
        Commands::Collect(args) => commands::collect_run(args, &ctx),
        Commands::Get(args) => commands::get_run(args, &ctx),
        Commands::CheckFreshness(args) => commands::check_freshness_run(args, &ctx),
        Commands::Add(args) => commands::add_run(args, &ctx),
        Commands::Update(args) => commands::update_run(args, &ctx),
        Commands::Remove(args) => commands::remove_run(args, &ctx),
        Commands::Deps(args) => commands::deps_run(args, &ctx),
        Commands::Init(args) => taskctx::infra::config::init(args, &ctx),
        Commands::Completions(args) => taskctx::completion::run(args, &ctx),
    }
}
