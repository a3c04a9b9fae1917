use std::sync::Arc;

use crate::{
    auth::{
        repo::{PgTokenRepo, PgUserRepo},
        services::AuthService,
    },
    clock::SystemClock,
    config::AppConfig,
    db::Db,
    mailer::LogMailer,
};

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub auth: Arc<AuthService>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;
        let db = Db::connect(&config).await?;

        let mailer = LogMailer {
            sender: config.mail_sender.clone(),
        };
        let auth = Arc::new(AuthService::new(
            Arc::new(PgUserRepo::new(db.clone())),
            Arc::new(PgTokenRepo::new(db.clone())),
            Arc::new(mailer),
            Arc::new(SystemClock),
            config.tokens.clone(),
        ));

        Ok(Self { db, auth })
    }
}
