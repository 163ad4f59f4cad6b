//! REPL 模式（交互式 Shell）
//!
//! 专用输入线程 + crossbeam 通道：rustyline 的 Editor 在输入线程内创建，
//! 主线程逐条执行命令，一条命令完整执行后才处理下一条。

use crate::parser::{ParseError, ShellCommand};
use anyhow::Result;
use crossbeam_channel::{Receiver, bounded};
use drive402_can::mock::{MockCanAdapter, SimulatedDriveConfig};
use drive402_client::{
    Drive, DriveConfig, DriveError, Precondition, TransportMode, WaitOutcome,
};
use rustyline::Editor;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const HISTORY_FILE: &str = ".drive402_history";

/// REPL 会话（保持驱动器连接）
pub struct ReplSession {
    drive: Option<Drive>,
    config: DriveConfig,
    /// 下次连接及当前会话使用的传输模式
    transport: TransportMode,
    simulate: bool,
}

impl ReplSession {
    pub fn new(config: DriveConfig, simulate: bool) -> Self {
        let transport = config.connection.transport;
        Self {
            drive: None,
            config,
            transport,
            simulate,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.drive.is_some()
    }

    fn drive(&mut self) -> Result<&mut Drive, DriveError> {
        self.drive
            .as_mut()
            .ok_or(DriveError::Precondition(Precondition::NotConnected))
    }

    /// 执行一条命令；返回 `false` 表示退出
    pub fn execute(&mut self, command: ShellCommand) -> Result<bool> {
        match command {
            ShellCommand::Connect => self.connect()?,
            ShellCommand::Disconnect => self.disconnect(),
            ShellCommand::Enable => {
                println!("⏳ 使能驱动器...");
                let status_word = self.drive()?.enable()?;
                println!("✅ 已使能 (Statusword 0x{:04X})", status_word);
            },
            ShellCommand::Disable => {
                println!("⏳ 去使能驱动器...");
                self.drive()?.disable()?;
                println!("✅ 已去使能");
            },
            ShellCommand::Home => self.home()?,
            ShellCommand::Move { target, wait } => {
                println!("🎯 移动到位置 {}...", target);
                self.drive()?.move_to(target)?;
                if wait {
                    self.wait(None)?;
                } else {
                    println!("✅ 运动命令已发送，使用 'wait' 等待完成");
                }
            },
            ShellCommand::Wait { timeout } => self.wait(timeout)?,
            ShellCommand::Status => self.status()?,
            ShellCommand::GetPos => {
                let position = self.drive()?.position()?;
                println!("📍 位置: {}", position);
            },
            ShellCommand::SetVel(value) => {
                self.drive()?.set_velocity(value)?;
                println!("✅ Velocity 设为 {}", value);
            },
            ShellCommand::SetAccel(value) => {
                self.drive()?.set_acceleration(value)?;
                println!("✅ Acceleration 设为 {}", value);
            },
            ShellCommand::SetDecel(value) => {
                self.drive()?.set_deceleration(value)?;
                println!("✅ Deceleration 设为 {}", value);
            },
            ShellCommand::GetParams => {
                let params = self.drive()?.parameters()?;
                println!();
                println!("═══ Motion Profile Parameters ═══");
                println!("Velocity     : {}", params.velocity);
                println!("Acceleration : {}", params.acceleration);
                println!("Deceleration : {}", params.deceleration);
                println!();
            },
            ShellCommand::UsePdo => self.use_transport(TransportMode::Pdo),
            ShellCommand::UseSdo => self.use_transport(TransportMode::Sdo),
            ShellCommand::Help => print_help(),
            ShellCommand::Exit => return Ok(false),
        }
        Ok(true)
    }

    fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            println!("⚠️  已经连接");
            return Ok(());
        }

        let mut config = self.config.clone();
        config.connection.transport = self.transport;

        println!(
            "⏳ 连接到 {} (节点 {})...",
            if self.simulate {
                "模拟驱动器"
            } else {
                config.connection.interface.as_str()
            },
            config.connection.node_id
        );

        let drive = if self.simulate {
            let (adapter, _handle) = MockCanAdapter::new(SimulatedDriveConfig {
                node_id: config.connection.node_id,
                ..Default::default()
            });
            Drive::connect(adapter, config)?
        } else {
            open_hardware(config)?
        };

        println!("✅ 已连接 (传输模式: {})", drive.transport_mode());
        self.drive = Some(drive);
        Ok(())
    }

    /// 断开连接（失败只记录，不阻止断开）
    pub fn disconnect(&mut self) {
        match self.drive.take() {
            Some(drive) => {
                println!("⏳ 断开连接...");
                drive.disconnect();
                println!("✅ 已断开");
            },
            None => println!("⚠️  未连接"),
        }
    }

    fn home(&mut self) -> Result<()> {
        println!("🏠 回零 (方法: 当前位置)...");
        let report = self.drive()?.home()?;
        if report.attained {
            println!("✅ 回零完成 (Statusword 0x{:04X})", report.status_word);
        } else {
            println!(
                "⚠️  回零未确认：bit10/bit12 未同时置位 (Statusword 0x{:04X})",
                report.status_word
            );
        }
        Ok(())
    }

    fn wait(&mut self, timeout: Option<f64>) -> Result<()> {
        let default_timeout = self.config.poll.default_timeout;
        let timeout = match timeout {
            Some(secs) => Duration::try_from_secs_f64(secs)?,
            None => default_timeout,
        };
        println!("⏳ 等待运动完成 (超时 {:?})...", timeout);
        match self.drive()?.wait(timeout)? {
            WaitOutcome::Reached { position, elapsed, .. } => match position {
                Some(position) => println!("✅ 目标到达! 位置: {} ({:.2?})", position, elapsed),
                None => println!("✅ 目标到达 ({:.2?})", elapsed),
            },
            WaitOutcome::TimedOut {
                last_status,
                last_position,
                ..
            } => {
                println!("⚠️  超时! 运动可能尚未完成");
                if let Some(status_word) = last_status {
                    println!("   最后 Statusword: 0x{:04X}", status_word);
                }
                if let Some(position) = last_position {
                    println!("   最后位置: {}", position);
                }
            },
        }
        Ok(())
    }

    fn status(&mut self) -> Result<()> {
        let status = self.drive()?.status()?;
        let sw = status.status_word;
        let flag = |mask: u16| if sw & mask != 0 { "✅" } else { "❌" };
        println!();
        println!("═══ Drive Status ═══");
        println!("Statusword      : 0x{:04X} ({})", sw, status.state);
        println!("  - Ready       : {}", flag(0x0001));
        println!("  - Switched On : {}", flag(0x0002));
        println!("  - Enabled     : {}", flag(0x0004));
        println!("  - Target OK   : {}", flag(0x0400));
        println!("Position        : {}", status.position);
        println!("Mode            : {}", status.mode);
        println!("Transport       : {}", status.transport);
        println!();
        Ok(())
    }

    fn use_transport(&mut self, mode: TransportMode) {
        self.transport = mode;
        if let Some(drive) = self.drive.as_mut() {
            drive.set_transport(mode);
        }
        println!("✅ 已切换到 {} 模式", mode);
    }
}

#[cfg(target_os = "linux")]
fn open_hardware(config: DriveConfig) -> Result<Drive, DriveError> {
    Drive::open(config)
}

#[cfg(not(target_os = "linux"))]
fn open_hardware(_config: DriveConfig) -> Result<Drive> {
    anyhow::bail!("SocketCAN 仅在 Linux 上可用，请使用 --simulate")
}

/// 输入线程发给主线程的事件
#[derive(Debug)]
enum InputEvent {
    Line(String),
    Interrupt,
}

/// REPL 输入（专用输入线程）
pub struct ReplInput {
    events: Receiver<InputEvent>,
    _input_thread: thread::JoinHandle<()>,
}

impl ReplInput {
    /// 创建专用输入线程（保留历史记录）
    ///
    /// Ctrl+D 或读取错误时通道关闭。
    pub fn new() -> Self {
        let (tx, events) = bounded::<InputEvent>(10);

        // Editor 在输入线程内创建，生命周期 = REPL 会话
        let input_thread = thread::spawn(move || {
            let mut rl = match Editor::<(), DefaultHistory>::new() {
                Ok(rl) => rl,
                Err(e) => {
                    eprintln!("Failed to initialize readline: {}", e);
                    return;
                },
            };
            rl.load_history(HISTORY_FILE).ok();

            loop {
                match rl.readline("drive402> ") {
                    Ok(line) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        let _ = rl.add_history_entry(line.as_str());
                        let exiting = matches!(line.as_str(), "exit" | "quit");
                        if tx.send(InputEvent::Line(line)).is_err() || exiting {
                            break;
                        }
                    },
                    Err(ReadlineError::Interrupted) => {
                        println!("^C");
                        let _ = tx.send(InputEvent::Interrupt);
                        break;
                    },
                    Err(ReadlineError::Eof) => break,
                    Err(err) => {
                        eprintln!("Error: {:?}", err);
                        break;
                    },
                }
            }
            if let Err(e) = rl.save_history(HISTORY_FILE) {
                debug!("Failed to save history: {}", e);
            }
        });

        Self {
            events,
            _input_thread: input_thread,
        }
    }
}

/// 运行 REPL 模式
pub fn run_repl(config: DriveConfig, simulate: bool) -> Result<()> {
    let mut session = ReplSession::new(config, simulate);
    let input = ReplInput::new();

    println!("drive402 CLI v{} - 交互式 Shell", env!("CARGO_PKG_VERSION"));
    println!("输入 'help' 查看帮助，'exit' 退出");
    if simulate {
        println!("🧪 模拟模式：连接到内置的 CiA 402 模拟驱动器");
    }
    println!();
    println!("💡 提示: 使用 'connect' 连接驱动器，然后 'enable' 使能");
    println!();

    loop {
        let line = match input.events.recv() {
            Ok(InputEvent::Line(line)) => line,
            Ok(InputEvent::Interrupt) => {
                eprintln!("\n🛑 收到 Ctrl+C");
                break;
            },
            // Ctrl+D
            Err(_) => break,
        };

        let command = match ShellCommand::parse(&line) {
            Ok(command) => command,
            Err(err) => {
                eprintln!("❌ {}", err);
                print_parse_hint(&err);
                continue;
            },
        };

        match session.execute(command) {
            Ok(true) => {},
            Ok(false) => break,
            Err(err) => {
                warn!("Command '{}' failed: {:#}", line, err);
                eprintln!("❌ Error: {}", err);
                print_error_hint(&err);
            },
        }
    }

    if session.is_connected() {
        session.disconnect();
    }
    println!("👋 再见！");
    Ok(())
}

/// 打印帮助信息
fn print_help() {
    println!("可用命令:");
    println!("  connect                       连接驱动器（NMT 复位 + PDO 配置）");
    println!("  disconnect                    断开连接（已使能时先去使能）");
    println!("  enable                        使能驱动器 (0x06 → 0x07 → 0x0F)");
    println!("  disable                       去使能驱动器 (0x06)");
    println!("  home                          以当前位置回零");
    println!("  move <position> [wait]        绝对位置运动，可选等待完成");
    println!("  wait [timeout]                等待目标到达（秒，可带小数）");
    println!("  status                        显示状态字、位置和运行模式");
    println!("  getpos                        读取实际位置");
    println!("  setvel <value>                设置轮廓速度 (0x6081)");
    println!("  setaccel <value>              设置轮廓加速度 (0x6083)");
    println!("  setdecel <value>              设置轮廓减速度 (0x6084)");
    println!("  getparams                     显示运动参数");
    println!("  usepdo / usesdo               切换命令传输模式");
    println!("  help                          显示帮助");
    println!("  exit / quit                   断开并退出");
    println!();
    println!("快捷键:");
    println!("  Ctrl+C / Ctrl+D               断开并退出");
    println!();
}

fn print_parse_hint(err: &ParseError) {
    match err {
        ParseError::Format { usage } => eprintln!("💡 用法: {}", usage),
        ParseError::UnknownCommand(_) => eprintln!("💡 提示: 输入 'help' 查看所有命令"),
    }
}

/// 提供基于错误的帮助提示
fn print_error_hint(err: &anyhow::Error) {
    match err.downcast_ref::<DriveError>() {
        Some(DriveError::Precondition(Precondition::NotConnected)) => {
            eprintln!("💡 提示: 先使用 'connect' 连接驱动器")
        },
        Some(DriveError::Precondition(Precondition::NotEnabled)) => {
            eprintln!("💡 提示: 先使用 'enable' 使能驱动器")
        },
        Some(err @ DriveError::DeviceRejected { .. }) => {
            if let Some(category) = err.abort_category() {
                eprintln!("💡 设备拒绝: {:?}", category);
            }
        },
        _ => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulated_session() -> ReplSession {
        let mut config = DriveConfig::default();
        config.connection.disconnect_settle = Duration::from_millis(10);
        config.poll.poll_interval = Duration::from_millis(20);
        config.homing.verify_timeout = Duration::from_millis(500);
        ReplSession::new(config, true)
    }

    #[test]
    fn test_commands_require_connection() {
        let mut session = simulated_session();
        let err = session.execute(ShellCommand::Enable).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DriveError>(),
            Some(DriveError::Precondition(Precondition::NotConnected))
        ));
    }

    #[test]
    fn test_transport_preference_survives_reconnect() {
        let mut session = simulated_session();
        assert!(session.execute(ShellCommand::UsePdo).unwrap());
        session.execute(ShellCommand::Connect).unwrap();
        assert_eq!(
            session.drive().unwrap().transport_mode(),
            TransportMode::Pdo
        );
        session.execute(ShellCommand::UseSdo).unwrap();
        assert_eq!(
            session.drive().unwrap().transport_mode(),
            TransportMode::Sdo
        );
        session.disconnect();
        assert!(!session.is_connected());
    }

    #[test]
    fn test_simulated_session_moves() {
        let mut session = simulated_session();
        session.execute(ShellCommand::Connect).unwrap();
        session.execute(ShellCommand::Enable).unwrap();
        session.execute(ShellCommand::Home).unwrap();
        session.execute(ShellCommand::SetVel(200_000)).unwrap();
        session
            .execute(ShellCommand::Move {
                target: 20_000,
                wait: true,
            })
            .unwrap();
        assert_eq!(session.drive().unwrap().position().unwrap(), 20_000);
        assert!(!session.execute(ShellCommand::Exit).unwrap());
        session.disconnect();
    }
}
