// NasCompanion/src/main.rs

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use common_models::server::ServerProtocol;
use log::{info, LevelFilter};

use nas_companion::commands::server_cmds::AddServerRequest;
use nas_companion::commands::{data_cmds, server_cmds, watch_cmds};
use nas_companion::config::{default_config_path, load_or_create};
use nas_companion::error::AppError;
use nas_companion::realtime::WebSocketConnector;
use nas_companion::state::AppState;
use nas_companion::storage::ServerStore;

#[derive(Parser)]
#[command(name = "nas-companion")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "存储设备伴侣：查看系统信息、存储池与实时指标")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 配置文件路径 (默认位于用户配置目录)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// 管理已知服务器
    Server {
        #[command(subcommand)]
        action: ServerAction,
    },
    /// 显示系统信息
    Info,
    /// 列出存储池
    Pools,
    /// 列出网络接口
    Interfaces,
    /// 申请并保存新的访问令牌
    Token {
        /// 有效期 (秒)，默认使用配置值
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// 持续显示实时指标，Ctrl-C 退出
    Watch {
        /// 显示指定帧数后退出
        #[arg(long)]
        frames: Option<usize>,
    },
}

#[derive(Subcommand)]
enum ServerAction {
    /// 添加服务器
    Add {
        host: String,
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
        #[arg(long, value_enum, default_value_t = Protocol::Https)]
        protocol: Protocol,
        /// 不连接设备探测版本
        #[arg(long)]
        no_probe: bool,
    },
    /// 列出服务器 (`*` 为当前选中)
    List,
    /// 删除服务器
    Remove { id: String },
    /// 选中服务器
    Select { id: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Protocol {
    Http,
    Https,
}

impl From<Protocol> for ServerProtocol {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Http => ServerProtocol::Http,
            Protocol::Https => ServerProtocol::Https,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 默认 Info，RUST_LOG 可覆盖
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .format_timestamp_millis()
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = load_or_create(&config_path);
    info!("[主程序] 配置已加载: {:?}", config_path);

    let store = ServerStore::load(&config.servers_file());
    let state = AppState::new(config, store, Arc::new(WebSocketConnector));

    let result = run(&state, cli.command).await;
    state.shutdown();

    match result {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
            Ok(())
        }
        Err(AppError::InvalidCredentials) => {
            anyhow::bail!("用户名或密码错误，请使用 `server add` 重新添加服务器。")
        }
        Err(e) => Err(e).context("命令执行失败"),
    }
}

async fn run(state: &AppState, command: Commands) -> Result<String, AppError> {
    match command {
        Commands::Server { action } => match action {
            ServerAction::Add {
                host,
                username,
                password,
                protocol,
                no_probe,
            } => {
                let request = AddServerRequest {
                    protocol: protocol.into(),
                    host,
                    username,
                    password,
                    probe: !no_probe,
                };
                server_cmds::add_server(state, request).await
            }
            ServerAction::List => server_cmds::list_servers(state).await,
            ServerAction::Remove { id } => server_cmds::remove_server(state, &id).await,
            ServerAction::Select { id } => server_cmds::select_server(state, &id).await,
        },
        Commands::Info => data_cmds::show_info(state).await,
        Commands::Pools => data_cmds::show_pools(state).await,
        Commands::Interfaces => data_cmds::show_interfaces(state).await,
        Commands::Token { ttl } => data_cmds::issue_token(state, ttl).await,
        Commands::Watch { frames } => {
            let shown = watch_cmds::watch(state, frames, |line| println!("{}", line)).await?;
            Ok(format!("共显示 {} 帧。", shown))
        }
    }
}
