// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 代理服务器
//!
//! 监听循环为每个 TCP 连接派生一个任务，连接内按 HTTP/1.1 长连接语义
//! 依次读取请求、交给 `Dispatcher` 处理并写回响应。
//!
//! 后台管理控制台从标准输入读取 `stop` / `status` / `help` 指令。

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::watch,
    time::timeout,
};

use crate::{
    dispatcher::Dispatcher,
    exception::Exception,
    param::*,
    request::Request,
    response::Response,
};

/// 运行状态计数，供 `status` 指令查看
#[derive(Debug, Default)]
pub struct ServerStats {
    active_connections: AtomicU32,
    total_connections: AtomicU64,
    total_requests: AtomicU64,
}

impl ServerStats {
    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }
}

/// 停机信号，可以在多个任务之间克隆
#[derive(Debug, Clone)]
pub struct Shutdown(Arc<watch::Sender<bool>>);

impl Shutdown {
    pub fn new() -> Self {
        Self(Arc::new(watch::channel(false).0))
    }

    pub fn trigger(&self) {
        self.0.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.0.subscribe()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Server {
    dispatcher: Arc<Dispatcher>,
    chunk_size: usize,
    stats: Arc<ServerStats>,
    shutdown: Shutdown,
}

impl Server {
    pub fn new(dispatcher: Dispatcher) -> Self {
        let chunk_size = dispatcher.config().chunk_size();
        Self {
            dispatcher: Arc::new(dispatcher),
            chunk_size,
            stats: Arc::new(ServerStats::default()),
            shutdown: Shutdown::new(),
        }
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// 主事件循环：持续接收新连接，直到收到停机信号
    pub async fn run(&self, listener: TcpListener) {
        let mut shutdown = self.shutdown.subscribe();
        let mut id: u128 = 0;

        loop {
            if self.shutdown.is_triggered() {
                info!("主循环接收到停机指令，正在退出...");
                break;
            }

            let (stream, addr) = tokio::select! {
                _ = shutdown.changed() => continue,
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("接受TCP连接失败: {}", e);
                        continue;
                    }
                },
            };
            debug!("[ID{}]TCP连接已建立: {}", id, addr);

            let dispatcher = Arc::clone(&self.dispatcher);
            let stats = Arc::clone(&self.stats);
            let chunk_size = self.chunk_size;
            tokio::spawn(async move {
                stats.active_connections.fetch_add(1, Ordering::Relaxed);
                stats.total_connections.fetch_add(1, Ordering::Relaxed);
                serve_connection(stream, &dispatcher, chunk_size, &stats, id).await;
                stats.active_connections.fetch_sub(1, Ordering::Relaxed);
            });
            id += 1;
        }
    }
}

/// 处理单个连接上的全部请求
///
/// 连接在以下情况结束：客户端关闭、空闲超过 `KEEP_ALIVE_TIMEOUT`、
/// 请求不可持久、达到 `KEEP_ALIVE_MAX_REQUESTS`、或者请求无法解析。
pub async fn serve_connection<S>(
    mut stream: S,
    dispatcher: &Dispatcher,
    chunk_size: usize,
    stats: &ServerStats,
    id: u128,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer: Vec<u8> = Vec::new();

    for served in 0..KEEP_ALIVE_MAX_REQUESTS {
        let request = match timeout(
            KEEP_ALIVE_TIMEOUT,
            Request::read_from(&mut stream, &mut buffer, id),
        )
        .await
        {
            Err(_) => {
                debug!("[ID{}]连接空闲超时", id);
                break;
            }
            Ok(Ok(None)) => {
                debug!("[ID{}]客户端关闭了连接", id);
                break;
            }
            Ok(Ok(Some(request))) => request,
            Ok(Err(Exception::Network(e))) => {
                debug!("[ID{}]读取TCPStream时遇到错误: {}", id, e);
                break;
            }
            Ok(Err(e)) => {
                warn!("[ID{}]解析HTTP请求失败: {}", id, e);
                let mut response = Response::from_exception(&e);
                response.set_header("Connection", "close");
                if let Err(e) = response.write_to(&mut stream, false, chunk_size, id).await {
                    debug!("[ID{}]发送错误页失败: {}", id, e);
                }
                break;
            }
        };
        stats.total_requests.fetch_add(1, Ordering::Relaxed);
        let start_time = Instant::now();

        let is_connect = request.method() == HttpRequestMethod::Connect;
        let persistent =
            !is_connect && request.is_persistent() && served + 1 < KEEP_ALIVE_MAX_REQUESTS;

        let mut response = if is_connect {
            warn!("[ID{}]拒绝CONNECT请求: {}", id, request.host());
            Response::response_501()
        } else {
            dispatcher.handle(&request, id).await
        };
        response.set_version(request.version());
        if !persistent {
            response
                .remove_header("Keep-Alive")
                .set_header("Connection", "close");
        }
        debug!(
            "[ID{}]HTTP响应构建完成，服务端用时{}ms。",
            id,
            start_time.elapsed().as_millis()
        );

        let status_code = response.status_code();
        let information = response.information().to_string();
        let headonly = request.method() == HttpRequestMethod::Head;
        let sent = match response.write_to(&mut stream, headonly, chunk_size, id).await {
            Ok(sent) => sent,
            Err(e) => {
                error!("[ID{}]发送响应失败: {}", id, e);
                break;
            }
        };

        info!(
            "[ID{}] {}, {}, {}, {}, {}, {}, {}, {}",
            id,
            request.version(),
            request.method(),
            request.host(),
            request.path_and_query(),
            status_code,
            information,
            sent,
            request.user_agent(),
        );

        if !persistent {
            break;
        }
    }
}

/// 后台管理控制台，输入结束或收到 `stop` 后返回
pub async fn console<R>(reader: R, stats: Arc<ServerStats>, shutdown: Shutdown)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("读取控制台输入失败: {}", e);
                break;
            }
        };
        match line.trim() {
            "" => {}
            "stop" => {
                shutdown.trigger();
                println!("停机指令已激活，服务器将停止接收新的连接...");
                break;
            }
            "help" => {
                println!("== {} Help ==", SERVER_NAME);
                println!("stop   - 发出停机信号");
                println!("status - 查看当前服务器运行状态");
                println!("help   - 显示此帮助信息");
                println!("====================");
            }
            "status" => {
                println!("== {} 状态 ===", SERVER_NAME);
                println!("当前活跃连接数: {}", stats.active_connections());
                println!("累计连接数: {}", stats.total_connections());
                println!("累计请求数: {}", stats.total_requests());
                println!("====================");
            }
            cmd => println!("无效的命令：{}", cmd),
        }
    }
}
