//! Shell 命令解析
//!
//! 解析只做格式检查，不接触设备：数值参数格式错误时返回 [`ParseError`]。

use drive402_client::MAX_WAIT;
use thiserror::Error;

/// Shell 命令
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShellCommand {
    Connect,
    Disconnect,
    Enable,
    Disable,
    Home,
    /// `move <position> [wait]`
    Move { target: i32, wait: bool },
    /// `wait [timeout]`，超时单位为秒
    Wait { timeout: Option<f64> },
    Status,
    GetPos,
    SetVel(i32),
    SetAccel(u32),
    SetDecel(u32),
    GetParams,
    UsePdo,
    UseSdo,
    Help,
    Exit,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("未知命令: '{0}'")]
    UnknownCommand(String),

    #[error("格式错误: {usage}")]
    Format { usage: &'static str },
}

impl ShellCommand {
    /// 命令用法，用于格式错误提示
    fn usage(name: &str) -> &'static str {
        match name {
            "move" => "move <position> [wait]",
            "wait" => "wait [timeout]",
            "setvel" => "setvel <value>",
            "setaccel" => "setaccel <value>",
            "setdecel" => "setdecel <value>",
            _ => "help",
        }
    }

    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((&name, args)) = parts.split_first() else {
            return Err(ParseError::UnknownCommand(String::new()));
        };
        let name = name.to_ascii_lowercase();
        let format_err = || ParseError::Format {
            usage: Self::usage(&name),
        };

        let no_args = |command: ShellCommand| {
            if args.is_empty() {
                Ok(command)
            } else {
                Err(ParseError::Format {
                    usage: Self::usage(&name),
                })
            }
        };

        match name.as_str() {
            "connect" => no_args(ShellCommand::Connect),
            "disconnect" => no_args(ShellCommand::Disconnect),
            "enable" => no_args(ShellCommand::Enable),
            "disable" => no_args(ShellCommand::Disable),
            "home" => no_args(ShellCommand::Home),
            "status" => no_args(ShellCommand::Status),
            "getpos" => no_args(ShellCommand::GetPos),
            "getparams" => no_args(ShellCommand::GetParams),
            "usepdo" => no_args(ShellCommand::UsePdo),
            "usesdo" => no_args(ShellCommand::UseSdo),
            "help" | "?" => Ok(ShellCommand::Help),
            "exit" | "quit" => Ok(ShellCommand::Exit),
            "move" => match args {
                [target] => Ok(ShellCommand::Move {
                    target: target.parse().map_err(|_| format_err())?,
                    wait: false,
                }),
                [target, flag] if flag.eq_ignore_ascii_case("wait") => Ok(ShellCommand::Move {
                    target: target.parse().map_err(|_| format_err())?,
                    wait: true,
                }),
                _ => Err(format_err()),
            },
            "wait" => match args {
                [] => Ok(ShellCommand::Wait { timeout: None }),
                [timeout] => {
                    let timeout: f64 = timeout.parse().map_err(|_| format_err())?;
                    if !(0.0..=MAX_WAIT.as_secs_f64()).contains(&timeout) {
                        return Err(format_err());
                    }
                    Ok(ShellCommand::Wait {
                        timeout: Some(timeout),
                    })
                },
                _ => Err(format_err()),
            },
            "setvel" => match args {
                [value] => Ok(ShellCommand::SetVel(value.parse().map_err(|_| format_err())?)),
                _ => Err(format_err()),
            },
            "setaccel" => match args {
                [value] => Ok(ShellCommand::SetAccel(value.parse().map_err(|_| format_err())?)),
                _ => Err(format_err()),
            },
            "setdecel" => match args {
                [value] => Ok(ShellCommand::SetDecel(value.parse().map_err(|_| format_err())?)),
                _ => Err(format_err()),
            },
            _ => Err(ParseError::UnknownCommand(parts.join(" "))),
        }
    }
}
