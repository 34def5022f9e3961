mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Map, Value};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use postd_core::{
    config::Config, context::AppContext, errors::Error, hosting::publish_file,
    platform::SocialPlatform, scheduler,
};
use postd_github::{GatewayClient, GatewayFile, GitHubContents, WorkflowClient};
use postd_reddit::RedditClient;

#[derive(Parser)]
#[command(
    name = "postd",
    about = "Scheduled community posts, welcomes and milestone announcements",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll and post due actions until Ctrl-C
    Run,

    /// Handle one serverless event read from stdin; prints {statusCode, body}
    Invoke {
        #[arg(long, value_enum)]
        platform: ServerlessPlatform,
        /// HTTP method of the original request (vercel only)
        #[arg(long, default_value = "POST")]
        method: String,
        /// Signature header of the original request (vercel only)
        #[arg(long)]
        signature: Option<String>,
    },

    /// Serve the webhook endpoints
    Serve {
        #[arg(long, env = "POSTD_LISTEN", default_value = "0.0.0.0:8080")]
        addr: String,
    },

    /// Publish a local file to a GitHub repository
    Push {
        file: PathBuf,
        /// Destination path in the repository (default: the file name)
        #[arg(long)]
        dest: Option<String>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        repo: Option<String>,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long, short = 'm', default_value = "Update via postd")]
        message: String,
        /// Push through the agent gateway as this user instead of the Contents API
        #[arg(long)]
        gateway_user: Option<String>,
    },

    /// Print the analytics dashboard
    Stats {
        /// Only the trailing 7-day summary
        #[arg(long)]
        weekly: bool,
    },

    /// Ask the CI workflow to perform an action
    Trigger {
        #[arg(value_enum)]
        action: RemoteAction,
        #[arg(long, default_value = "reddit-bot.yml")]
        workflow: String,
        #[arg(long = "ref", default_value = "main")]
        git_ref: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ServerlessPlatform {
    Lambda,
    Vercel,
    Netlify,
}

#[derive(Clone, Copy, ValueEnum)]
enum RemoteAction {
    WeeklyThread,
    Milestone,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    postd_core::logging::init("postd")?;
    let cli = Cli::parse();

    let cfg = Config::load()?;
    let reddit = RedditClient::from_config(&cfg)?;
    let has_account = reddit.account_name().is_some();
    let ctx = AppContext::new(cfg, Arc::new(reddit));

    match cli.command {
        Commands::Run => {
            if ctx.cfg.serverless {
                anyhow::bail!("REDDIT_SERVERLESS is set; use `postd invoke` or `postd serve`");
            }
            if !has_account {
                let err = Error::AuthMissing("reddit credentials are not configured".into());
                return Err(err.into());
            }
            run(&ctx).await
        }
        Commands::Invoke {
            platform,
            method,
            signature,
        } => invoke(&ctx, platform, &method, signature.as_deref()).await,
        Commands::Serve { addr } => {
            let cancel = cancel_on_ctrl_c();
            server::serve(ctx.adapter.clone(), &addr, cancel).await
        }
        Commands::Push {
            file,
            dest,
            owner,
            repo,
            branch,
            message,
            gateway_user,
        } => {
            let owner = owner.unwrap_or_else(|| ctx.cfg.github_repo_owner.clone());
            let repo = repo.unwrap_or_else(|| ctx.cfg.github_repo_name.clone());
            let args = PushArgs {
                file,
                dest,
                owner,
                repo,
                branch,
                message,
                gateway_user,
            };
            push(&ctx, args).await
        }
        Commands::Stats { weekly } => {
            let now = Utc::now();
            let out = if weekly {
                serde_json::to_value(ctx.store.weekly_stats(now)?)?
            } else {
                serde_json::to_value(ctx.store.dashboard(now)?)?
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
        Commands::Trigger {
            action,
            workflow,
            git_ref,
            title,
            description,
        } => trigger(&ctx, action, &workflow, &git_ref, title, description).await,
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
        }
        c.cancel();
    });
    cancel
}

async fn run(ctx: &AppContext) -> anyhow::Result<()> {
    let cancel = cancel_on_ctrl_c();
    scheduler::run_polling(
        ctx.dispatcher.clone(),
        ctx.cfg.tick_interval,
        ctx.cfg.monitor_posts,
        cancel,
    )
    .await;
    Ok(())
}

async fn invoke(
    ctx: &AppContext,
    platform: ServerlessPlatform,
    method: &str,
    signature: Option<&str>,
) -> anyhow::Result<()> {
    let mut raw = Vec::new();
    tokio::io::stdin().read_to_end(&mut raw).await?;
    let now = Utc::now();

    let resp = match platform {
        ServerlessPlatform::Vercel => {
            ctx.adapter
                .handle_vercel(method, &raw, signature, now)
                .await
        }
        ServerlessPlatform::Lambda => ctx.adapter.handle_lambda(event_json(&raw)?, now).await,
        ServerlessPlatform::Netlify => ctx.adapter.handle_netlify(event_json(&raw)?, now).await,
    };

    println!("{}", resp.to_platform_json());
    Ok(())
}

fn event_json(raw: &[u8]) -> anyhow::Result<Value> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(raw).context("stdin is not a JSON event")
}

struct PushArgs {
    file: PathBuf,
    dest: Option<String>,
    owner: String,
    repo: String,
    branch: Option<String>,
    message: String,
    gateway_user: Option<String>,
}

async fn push(ctx: &AppContext, args: PushArgs) -> anyhow::Result<()> {
    // No network call is made without a token.
    let token = ctx.credentials.resolve().await?;

    let content = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("reading {}", args.file.display()))?;
    let dest = match args.dest {
        Some(d) => d,
        None => args
            .file
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .context("cannot derive a destination path; pass --dest")?,
    };

    if let Some(user) = args.gateway_user {
        let gateway = GatewayClient::new(&ctx.cfg.gateway_url)?;
        gateway.register_token(&user, &token).await?;
        let text = String::from_utf8(content).context("gateway push needs UTF-8 content")?;
        let out = gateway
            .push(
                &user,
                &args.repo,
                &[GatewayFile {
                    path: dest.clone(),
                    content: text,
                }],
                &args.message,
            )
            .await?;
        println!(
            "{}",
            json!({ "path": dest, "via": "gateway", "results": out.results })
        );
        return Ok(());
    }

    let mut host = GitHubContents::new(&token, &args.owner, &args.repo)?;
    if let Some(branch) = args.branch {
        host = host.with_branch(branch);
    }
    let out = publish_file(&host, &dest, &content, &args.message).await?;
    println!(
        "{}",
        json!({
            "path": dest,
            "created": out.created,
            "commit": out.commit.sha,
            "html_url": out.commit.html_url,
        })
    );
    Ok(())
}

async fn trigger(
    ctx: &AppContext,
    action: RemoteAction,
    workflow: &str,
    git_ref: &str,
    title: Option<String>,
    description: Option<String>,
) -> anyhow::Result<()> {
    let token = ctx.credentials.resolve().await?;
    let client = WorkflowClient::new(
        &token,
        ctx.cfg.github_repo_owner.as_str(),
        ctx.cfg.github_repo_name.as_str(),
    )?;

    let mut inputs = Map::new();
    match action {
        RemoteAction::WeeklyThread => {
            inputs.insert("action".into(), json!("weekly_thread"));
        }
        RemoteAction::Milestone => {
            inputs.insert("action".into(), json!("post_milestone"));
            inputs.insert(
                "milestone_title".into(),
                json!(title.unwrap_or_else(|| "CodeDAO Milestone".to_string())),
            );
            inputs.insert(
                "milestone_description".into(),
                json!(description
                    .unwrap_or_else(|| "A new milestone has been reached!".to_string())),
            );
        }
    }

    client.dispatch(workflow, git_ref, inputs).await?;
    println!("{}", json!({ "success": true, "workflow": workflow, "ref": git_ref }));
    Ok(())
}
