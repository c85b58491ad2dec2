// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 旧版网页代理
//!
//! 启动流程：解析命令行参数、初始化日志、载入配置、构建 Tokio 运行时、
//! 探测脚本解释器，然后在代理端口上进入主事件循环。

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
};

use clap::Parser;
use log::{error, info, LevelFilter};
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
};
use tokio::{io::BufReader, net::TcpListener, runtime::Builder};

use legacy_proxy::{
    config::Config,
    dispatcher::Dispatcher,
    exception::Exception,
    server::{console, Server},
};

#[derive(Parser, Debug)]
#[command(version, about = "Serves archived legacy web content as if from its original hosts")]
struct Args {
    /// 配置文件路径，`.json` 后缀按 JSON 解析，否则按 TOML 解析
    #[arg(short, long, default_value = "config/development.toml")]
    config: PathBuf,

    /// log4rs 配置文件路径
    #[arg(long, default_value = "config/log4rs.yaml")]
    log_config: PathBuf,

    /// 覆盖配置文件中的代理端口
    #[arg(short, long)]
    port: Option<u16>,

    /// 强制开启实时抓取
    #[arg(long)]
    live_capture: bool,

    /// 强制开启远程镜像
    #[arg(long)]
    mirror: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    let config = match Config::from_file(&args.config)
        .and_then(|c| c.apply_overrides(args.port, args.mirror, args.live_capture))
    {
        Ok(config) => config,
        Err(e) => {
            error!("无法载入配置文件{}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };
    info!("配置文件已载入");

    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法构建Tokio运行时: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(Arc::new(config)));
    // 控制台任务阻塞在 stdin 上，不等待它结束
    runtime.shutdown_background();
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// 优先使用 YAML 配置，失败时退回到内置的控制台输出
fn init_logging(args: &Args) {
    if let Err(e) = log4rs::init_file(&args.log_config, Default::default()) {
        let stdout = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new(
                "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {m}{n}",
            )))
            .build();
        let fallback = log4rs::Config::builder()
            .appender(Appender::builder().build("stdout", Box::new(stdout)))
            .build(Root::builder().appender("stdout").build(LevelFilter::Info));
        match fallback.map(log4rs::init_config) {
            Ok(Ok(_)) => {
                log::warn!("无法载入日志配置{}，使用默认控制台输出: {}", args.log_config.display(), e)
            }
            _ => eprintln!("无法初始化日志系统: {}", e),
        }
    }
}

async fn run(config: Arc<Config>) -> Result<(), Exception> {
    let dispatcher = Dispatcher::new(Arc::clone(&config))?;
    if let Some(legacy) = dispatcher.legacy() {
        legacy.cgi().probe_version();
    }
    info!(
        "镜像：{}，实时抓取：{}，回退模式：{:?}",
        config.use_mirror(),
        config.use_live_capture(),
        config.legacy_mode()
    );

    let port = config.proxy_port();
    let address = match config.local() {
        true => Ipv4Addr::new(127, 0, 0, 1),
        false => Ipv4Addr::new(0, 0, 0, 0),
    };
    info!("服务端将在{}:{}上监听Socket连接", address, port);
    let listener = TcpListener::bind(SocketAddrV4::new(address, port))
        .await
        .map_err(|e| Exception::Config(format!("无法绑定端口：{}，错误：{}", port, e)))?;
    info!("端口{}绑定完成", port);

    let server = Server::new(dispatcher);
    tokio::spawn(console(
        BufReader::new(tokio::io::stdin()),
        server.stats(),
        server.shutdown(),
    ));
    server.run(listener).await;
    info!("服务器已停止");
    Ok(())
}
