//! Telegram Mini App 运维 CLI 工具

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tma_core::config::ENV_BOT_TOKEN;
use tma_core::{
    sign_init_data, AppConfig, Clock, FileStore, InitDataVerifier, SharedPredictor, SystemClock,
    TelegramUser, VerifyOptions,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tma")]
#[command(about = "Telegram Mini App initData 校验与导航预测工具", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 生成签名后的 initData
    Sign {
        /// Bot token
        #[arg(short, long, env = ENV_BOT_TOKEN)]
        token: String,
        /// 用户 ID
        #[arg(short, long)]
        user_id: i64,
        /// 名
        #[arg(long)]
        first_name: Option<String>,
        /// 用户名
        #[arg(long)]
        username: Option<String>,
        /// auth_date（Unix 秒），默认当前时间
        #[arg(long)]
        auth_date: Option<u64>,
        #[arg(long)]
        query_id: Option<String>,
        #[arg(long)]
        start_param: Option<String>,
    },
    /// 校验 initData
    Verify {
        /// initData 字符串
        #[arg(short, long)]
        init_data: String,
        /// Bot token
        #[arg(short, long, env = ENV_BOT_TOKEN)]
        token: Option<String>,
        /// 最大时长（秒）
        #[arg(long)]
        max_age: Option<u64>,
        /// 允许缺少 user 字段
        #[arg(long)]
        allow_missing_user: bool,
    },
    /// 导航预测
    Nav {
        /// 存储目录
        #[arg(short, long)]
        store_dir: Option<PathBuf>,
        #[command(subcommand)]
        action: NavAction,
    },
}

#[derive(Subcommand)]
enum NavAction {
    /// 记录一次跳转
    Record { from: String, to: String },
    /// 预测下一跳
    Predict {
        current: String,
        #[arg(long, default_value_t = 3)]
        max: usize,
        #[arg(long, default_value_t = 0.1)]
        min_confidence: f64,
    },
    /// 统计
    Stats,
    /// 清空
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match cli.command {
        Commands::Sign {
            token,
            user_id,
            first_name,
            username,
            auth_date,
            query_id,
            start_param,
        } => {
            let mut user = TelegramUser::new(user_id);
            user.first_name = first_name;
            user.username = username;
            do_sign(&token, &user, auth_date, query_id, start_param)?;
        }
        Commands::Verify {
            init_data,
            token,
            max_age,
            allow_missing_user,
        } => {
            let mut options = config.auth.verify;
            if let Some(max_age) = max_age {
                options.max_auth_age_secs = max_age;
            }
            options.allow_missing_user |= allow_missing_user;
            let token = token.or(config.auth.bot_token.clone());
            do_verify(&init_data, token.as_deref(), options)?;
        }
        Commands::Nav { store_dir, action } => {
            let dir = store_dir.unwrap_or_else(|| config.storage_dir.clone());
            do_nav(&config, &dir, action).await?;
        }
    }

    Ok(())
}

fn do_sign(
    token: &str,
    user: &TelegramUser,
    auth_date: Option<u64>,
    query_id: Option<String>,
    start_param: Option<String>,
) -> anyhow::Result<()> {
    let auth_date = auth_date.unwrap_or_else(|| SystemClock.now_secs());

    let mut pairs = vec![
        ("auth_date".to_string(), auth_date.to_string()),
        ("user".to_string(), serde_json::to_string(user)?),
    ];
    if let Some(query_id) = query_id {
        pairs.push(("query_id".to_string(), query_id));
    }
    if let Some(start_param) = start_param {
        pairs.push(("start_param".to_string(), start_param));
    }

    println!("{}", sign_init_data(&pairs, token)?);
    Ok(())
}

fn do_verify(init_data: &str, token: Option<&str>, options: VerifyOptions) -> anyhow::Result<()> {
    let token = token.ok_or_else(|| anyhow::anyhow!("未配置 bot token（--token 或 {}）", ENV_BOT_TOKEN))?;

    let verifier = InitDataVerifier::new(options);
    match verifier.try_verify(init_data, token) {
        Ok(parsed) => {
            println!("{}", serde_json::to_string_pretty(&parsed)?);
            Ok(())
        }
        Err(e) => {
            tracing::debug!("Verification failed: {:?}", e.reason());
            Err(anyhow::anyhow!("验证失败: {}", e.code()))
        }
    }
}

async fn do_nav(config: &AppConfig, dir: &PathBuf, action: NavAction) -> anyhow::Result<()> {
    let store = Arc::new(FileStore::open(dir)?);
    let predictor = SharedPredictor::open(store, Arc::new(SystemClock), config.predictor.clone());
    predictor.ready().await;

    match action {
        NavAction::Record { from, to } => {
            predictor.record_navigation(&from, &to).await;
            println!("已记录: {} -> {}", from, to);
        }
        NavAction::Predict {
            current,
            max,
            min_confidence,
        } => {
            let candidates = predictor.predict(&current, max, min_confidence).await;
            if candidates.is_empty() {
                println!("无预测结果");
            }
            for candidate in candidates {
                println!("{}", candidate);
            }
        }
        NavAction::Stats => {
            let stats = predictor.stats().await;
            println!("{}", serde_json::to_string(&stats)?);
        }
        NavAction::Clear => {
            predictor.clear().await;
            println!("导航数据已清空");
        }
    }

    Ok(())
}
