use anyhow::anyhow;
use camino::Utf8PathBuf;
use clap::Parser;
use kamado::{Config, Environment, init_logging, register};
use tracing::info;

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// Task to run. `watch` and `serve` start the watcher or the HTTP server
    /// on the current output.
    #[clap(index = 1, default_value = "default")]
    task: String,

    /// Config file, `kamado.json` in the current directory by default.
    #[clap(long)]
    config: Option<Utf8PathBuf>,

    /// Log filter, overrides `KAMADO_LOG`.
    #[clap(long)]
    log_level: Option<String>,

    /// Print the task graph as a Mermaid diagram and exit.
    #[clap(long)]
    graph: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref())?;

    let config = match &args.config {
        Some(path) => Config::load_file(path)?,
        None => Config::load(".")?,
    };
    let env = Environment::new(config);

    if args.graph {
        print!("{}", register(&env)?.graph);
        return Ok(());
    }

    match args.task.as_str() {
        #[cfg(feature = "live")]
        "default" => develop(env, true, true),
        #[cfg(feature = "live")]
        "watch" => develop(env, false, false),
        #[cfg(not(feature = "live"))]
        "watch" => Err(anyhow!("watch mode needs the `live` feature")),
        "serve" => serve(&env),
        name => run(&env, name),
    }
}

fn run(env: &Environment, name: &str) -> anyhow::Result<()> {
    let tasks = register(env)?;
    let id = tasks.graph.lookup(name)?;
    let report = tasks.graph.run(env, id)?;

    info!("finished {name}\n{report}");
    Ok(())
}

#[cfg(feature = "live")]
fn develop(env: Environment, build: bool, serve: bool) -> anyhow::Result<()> {
    use kamado::reload::LiveReloadBroker;

    let broker = LiveReloadBroker::bind(env.config.server.reload_port)?;
    let env = env.with_reload_port(broker.port());
    let tasks = register(&env)?;

    if build {
        let report = tasks.graph.run(&env, tasks.graph.lookup("default")?)?;
        info!("initial build completed\n{report}");
    }

    #[cfg(feature = "server")]
    let _server = serve.then(|| kamado::http::DevServer::new(&env.config).start());
    #[cfg(not(feature = "server"))]
    if serve {
        tracing::warn!("built without the `server` feature, not serving");
    }

    info!("watching for changes...");
    kamado::watch::watch(&env, &tasks, &broker)?;

    Ok(())
}

#[cfg(feature = "server")]
fn serve(env: &Environment) -> anyhow::Result<()> {
    kamado::http::DevServer::new(&env.config)
        .start()
        .join()
        .map_err(|_| anyhow!("HTTP server thread panicked"))?
}

#[cfg(not(feature = "server"))]
fn serve(_: &Environment) -> anyhow::Result<()> {
    Err(anyhow!("serving needs the `server` feature"))
}
