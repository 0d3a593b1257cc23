use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use reedline::{DefaultCompleter, DefaultHinter, DefaultPrompt, Reedline, Signal};

use crate::agent::{ChatSession, ConsoleObserver, GREETING};
use crate::config::Config;
use crate::db::DbTarget;

/// 打印帮助信息
fn print_help() {
    println!("🦜 dbq - 用自然语言查询你的 SQL 数据库");
    println!();
    println!("用法：dbq <命令>");
    println!();
    println!("命令:");
    println!("  chat            进入交互模式");
    println!("  onboard         初始化配置和示例数据库");
    println!("  help            显示此帮助信息");
    println!();
    println!("交互模式命令:");
    println!("  /db                                        查看当前数据库");
    println!("  /db local [路径]                           切换到本地 SQLite（只读）");
    println!("  /db mysql <host> <user> <密码> <库名>      切换到 MySQL");
    println!("  /key <api_key>                             设置 Groq API key");
    println!("  /clear                                     清空对话");
    println!("  /quit                                      退出");
    println!();
    println!("示例:");
    println!("  dbq onboard         # 生成配置和 student.db");
    println!("  dbq chat            # 开始提问");
}

/// Onboard 命令 - 生成配置文件和示例数据库
fn run_onboard() -> Result<()> {
    println!("🚀 初始化 dbq 配置...\n");

    let config = Config::default();
    let config_path = Config::default_path();
    config.save(&config_path).context("保存配置文件失败")?;
    println!("✅ 保存配置：{}", config_path.display());

    let db_path = &config.database.sqlite_path;
    if db_path.exists() {
        println!("ℹ️ 示例数据库已存在：{}", db_path.display());
    } else {
        seed_sample_database(db_path).context("创建示例数据库失败")?;
        println!("✅ 创建示例数据库：{}", db_path.display());
    }
    println!();

    println!("🎉 初始化完成！");
    println!();
    println!("接下来:");
    println!("  1. 设置 GROQ_API_KEY 环境变量（或对话中用 /key 设置）");
    println!("  2. 运行 'dbq chat' 开始提问");

    Ok(())
}

/// 生成示例数据库：STUDENT 表加五条记录
fn seed_sample_database(path: &Path) -> Result<()> {
    let conn = rusqlite::Connection::open(path)?;
    conn.execute_batch(
        "CREATE TABLE STUDENT (
            NAME    VARCHAR(25),
            CLASS   VARCHAR(25),
            SECTION VARCHAR(25),
            MARKS   INT
        );
        INSERT INTO STUDENT VALUES ('Krish', 'Data Science', 'A', 90);
        INSERT INTO STUDENT VALUES ('Sudhanshu', 'Data Science', 'B', 100);
        INSERT INTO STUDENT VALUES ('Darius', 'Data Science', 'A', 86);
        INSERT INTO STUDENT VALUES ('Vikash', 'DEVOPS', 'A', 50);
        INSERT INTO STUDENT VALUES ('Dipesh', 'DEVOPS', 'B', 35);",
    )?;
    Ok(())
}

/// 解析 /db 命令的参数。None 表示只查看状态
fn parse_db_command(parts: &[&str], default_sqlite: &Path) -> Result<Option<DbTarget>, String> {
    match parts.get(1).copied() {
        None => Ok(None),
        Some("local") => {
            let path = parts
                .get(2)
                .map(PathBuf::from)
                .unwrap_or_else(|| default_sqlite.to_path_buf());
            Ok(Some(DbTarget::Local { path }))
        }
        Some("mysql") => {
            if parts.len() < 6 {
                return Err("用法：/db mysql <host> <user> <密码> <库名>".to_string());
            }
            Ok(Some(DbTarget::MySql {
                host: parts[2].to_string(),
                user: parts[3].to_string(),
                password: parts[4].to_string(),
                database: parts[5].to_string(),
            }))
        }
        Some(other) => Err(format!("未知数据库模式：{}（可选 local / mysql）", other)),
    }
}

fn print_assistant(text: &str) {
    println!("🤖 AI: {}\n", text);
}

fn print_repl_help() {
    println!("命令:");
    println!("  /db                                        查看当前数据库");
    println!("  /db local [路径]                           切换到本地 SQLite（只读）");
    println!("  /db mysql <host> <user> <密码> <库名>      切换到 MySQL");
    println!("  /key <api_key>                             设置 Groq API key");
    println!("  /clear                                     清空对话");
    println!("  /quit                                      退出");
    println!();
}

/// Chat 命令 - 交互式提问
async fn run_chat() -> Result<()> {
    println!("🦜 dbq - 和你的 SQL 数据库聊天");
    println!("可用工具：sql_db_list_tables, sql_db_schema, sql_db_query_checker, sql_db_query");
    println!("输入 'quit' 或 'exit' 退出，输入 'help' 查看帮助\n");

    let config = Config::load_default()?;
    let default_sqlite = config.database.sqlite_path.clone();

    println!("🗄️ 数据库：{}", config.database.target().describe());
    println!("🤖 模型：{}", config.agent.model);

    let mut session = ChatSession::new(config);

    if !session.api_key_set() {
        println!("ℹ️ 未检测到 GROQ_API_KEY，提问前请用 /key <api_key> 设置");
    }
    println!("📝 会话：{}（{}）", short_id(session.id()), session.started_at().format("%H:%M"));
    println!();
    print_assistant(GREETING);

    // 使用 reedline 处理输入，支持 UTF-8 和行编辑
    let completer = DefaultCompleter::default();
    let hinter = DefaultHinter::default();
    let prompt = DefaultPrompt::default();

    let mut line_editor = Reedline::create()
        .with_hinter(Box::new(hinter))
        .with_completer(Box::new(completer));

    loop {
        let sig = line_editor.read_line(&prompt)?;

        match sig {
            Signal::Success(buffer) => {
                let input = buffer.trim();

                if input.is_empty() {
                    continue;
                }

                // 斜杠命令
                if input.starts_with('/') {
                    let parts: Vec<&str> = input.split_whitespace().collect();
                    let cmd = parts.first().map(|s| s.to_lowercase()).unwrap_or_default();

                    match cmd.as_str() {
                        "/quit" | "/exit" => {
                            println!("👋 再见！");
                            break;
                        }
                        "/clear" => {
                            session.reset();
                            println!("✅ 已清空对话\n");
                            print_assistant(GREETING);
                        }
                        "/key" => match parts.get(1) {
                            Some(key) => {
                                session.set_api_key(key);
                                println!("✅ 已设置 API key\n");
                            }
                            None => {
                                println!("❌ 用法：/key <api_key>\n");
                            }
                        },
                        "/db" => match parse_db_command(&parts, &default_sqlite) {
                            Ok(None) => {
                                let cached = if session.is_target_cached() {
                                    "已连接（缓存）"
                                } else {
                                    "未连接"
                                };
                                println!("🗄️ {}（{}）\n", session.target().describe(), cached);
                            }
                            Ok(Some(target)) => match session.set_target(target) {
                                Ok(()) => {
                                    println!("✅ 已切换：{}", session.target().describe());
                                    println!("ℹ️ 将在下次提问时建立连接\n");
                                }
                                Err(e) => {
                                    println!("❌ {}\n", e);
                                }
                            },
                            Err(usage) => {
                                println!("❌ {}\n", usage);
                            }
                        },
                        "/help" | "/h" => {
                            print_repl_help();
                        }
                        _ => {
                            println!("❌ 未知命令：{}", input);
                            println!("输入 /help 查看帮助\n");
                        }
                    }
                    continue;
                }

                // 普通输入命令（兼容不带斜杠的写法）
                if input.eq_ignore_ascii_case("quit") || input.eq_ignore_ascii_case("exit") {
                    println!("👋 再见！");
                    break;
                }

                if input.eq_ignore_ascii_case("clear") {
                    session.reset();
                    println!("✅ 已清空对话\n");
                    print_assistant(GREETING);
                    continue;
                }

                if input.eq_ignore_ascii_case("help") {
                    print_repl_help();
                    continue;
                }

                // 没有 API key 不进 agent，提示完继续等输入
                if !session.api_key_set() {
                    println!("ℹ️ 请先设置 Groq API key：/key <api_key>（或设置 GROQ_API_KEY 环境变量）\n");
                    continue;
                }

                match session.ask(input, Some(&ConsoleObserver)).await {
                    Ok(reply) => {
                        print_assistant(&reply.answer);
                    }
                    Err(e) => {
                        println!("❌ 错误：{}\n", e);
                    }
                }
            }
            Signal::CtrlD => {
                println!("\n👋 再见！");
                break;
            }
            Signal::CtrlC => {
                println!("\n输入 /quit 退出，或继续输入问题");
            }
        }
    }

    Ok(())
}

/// 只显示 ID 前 8 位
fn short_id(id: &str) -> &str {
    if id.len() > 8 {
        &id[..8]
    } else {
        id
    }
}

/// 主入口函数
pub async fn run_cli() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    let command = args[1].to_lowercase();

    match command.as_str() {
        "chat" | "c" => run_chat().await,
        "onboard" => run_onboard(),
        "help" | "-h" | "--help" | "h" => {
            print_help();
            Ok(())
        }
        _ => {
            eprintln!("❌ 未知命令：{}", command);
            eprintln!();
            eprintln!("运行 'dbq help' 查看帮助信息");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(input: &str) -> Vec<&str> {
        input.split_whitespace().collect()
    }

    #[test]
    fn db_command_without_args_means_status() {
        let result = parse_db_command(&parts("/db"), Path::new("student.db")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn db_local_uses_default_path_when_omitted() {
        let target = parse_db_command(&parts("/db local"), Path::new("student.db"))
            .unwrap()
            .unwrap();
        assert_eq!(
            target,
            DbTarget::Local {
                path: PathBuf::from("student.db")
            }
        );

        let target = parse_db_command(&parts("/db local other.db"), Path::new("student.db"))
            .unwrap()
            .unwrap();
        assert_eq!(
            target,
            DbTarget::Local {
                path: PathBuf::from("other.db")
            }
        );
    }

    #[test]
    fn db_mysql_requires_all_four_arguments() {
        let err = parse_db_command(&parts("/db mysql host user"), Path::new("student.db"))
            .unwrap_err();
        assert!(err.contains("用法"));

        let target =
            parse_db_command(&parts("/db mysql host user pw school"), Path::new("student.db"))
                .unwrap()
                .unwrap();
        assert_eq!(
            target,
            DbTarget::MySql {
                host: "host".to_string(),
                user: "user".to_string(),
                password: "pw".to_string(),
                database: "school".to_string(),
            }
        );
    }

    #[test]
    fn db_unknown_mode_is_rejected() {
        let err = parse_db_command(&parts("/db postgres"), Path::new("student.db")).unwrap_err();
        assert!(err.contains("postgres"));
    }

    #[test]
    fn short_id_truncates_uuids() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("short"), "short");
    }

    #[tokio::test]
    async fn onboard_seed_produces_queryable_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("student.db");
        seed_sample_database(&path).unwrap();

        let handle = crate::db::DatabaseHandle::connect(&DbTarget::Local { path })
            .await
            .unwrap();
        assert_eq!(handle.list_tables().await.unwrap(), vec!["STUDENT".to_string()]);
        let output = handle
            .run_query("SELECT COUNT(*) FROM STUDENT", 10)
            .await
            .unwrap();
        assert_eq!(output.rows[0][0], "5");
    }
}
