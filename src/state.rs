use std::sync::Arc;

use crate::{
    db::{DbPool, OrmConn},
    gateway::Gateways,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub gateways: Arc<Gateways>,
}
