//! Mutable runtime shared-params, as distinct from the process-start
//! [`crate::config::SharedParamsConfig`] defaults: this is the live value a
//! deployment can `get`/`set`/`refresh` through the outward API without a
//! restart, seeded from config at startup.

use serde::{Deserialize, Serialize};

use crate::config::SharedParamsConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharedParams {
    pub expire_epoch: i64,
    pub gas_over_estimation: f64,
    pub max_fee: u128,
    pub max_fee_cap: u128,
    pub sel_msg_num: u64,
    pub max_est_fail_num_of_msg: u64,
    pub scan_interval_secs: u64,
}

impl From<&SharedParamsConfig> for SharedParams {
    fn from(c: &SharedParamsConfig) -> Self {
        Self {
            expire_epoch: c.expire_epoch,
            gas_over_estimation: c.gas_over_estimation,
            max_fee: c.max_fee,
            max_fee_cap: c.max_fee_cap,
            sel_msg_num: c.sel_msg_num,
            max_est_fail_num_of_msg: c.max_est_fail_num_of_msg,
            scan_interval_secs: c.scan_interval_secs,
        }
    }
}

impl SharedParams {
    pub fn as_message_meta_defaults(&self) -> crate::config::SharedParamsConfig {
        SharedParamsConfig {
            expire_epoch: self.expire_epoch,
            gas_over_estimation: self.gas_over_estimation,
            max_fee: self.max_fee,
            max_fee_cap: self.max_fee_cap,
            sel_msg_num: self.sel_msg_num,
            max_est_fail_num_of_msg: self.max_est_fail_num_of_msg,
            scan_interval_secs: self.scan_interval_secs,
        }
    }
}
