//! YAML configuration structures for the NB-IoT eNB
//!
//! Mirrors srsRAN's split configuration surface: a top-level `enb.conf`
//! (`general`/`enb_files`/`rf`/`log`/`pcap`/`expert`) plus the cell-specific
//! `rr.conf`/`sib.conf` fragments (`cell`/`rr`/`sib1`/`sib2`/`sib3`), all
//! loaded into one `EnbConfig` for simplicity.

use serde::{Deserialize, Serialize};

use common::types::{CellId, OperationMode, Pci, PlmnId};
use interfaces::zmq_rf::ZmqRfConfig;
use layers::mac::{MacConfig, Sib1Config};
use layers::phy::PhyConfig;

/// Top-level configuration structure, loaded from a single YAML file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnbConfig {
    pub general: GeneralConfig,
    #[serde(default)]
    pub enb_files: EnbFilesConfig,
    pub cell: CellConfig,
    #[serde(default)]
    pub rr: RrConfig,
    pub sib1: Sib1ConfigYaml,
    #[serde(default)]
    pub sib2: Sib2ConfigYaml,
    /// Cell reselection parameters: opaque to PHY/MAC, passed through.
    #[serde(default)]
    pub sib3: serde_yaml::Value,
    pub rf: RfConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub pcap: PcapConfig,
    #[serde(default)]
    pub expert: ExpertConfig,
}

/// `general {enb_id, name, mcc, mnc, mme_addr, gtp_bind_addr, s1c_bind_addr, nof_ports, mode}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralConfig {
    pub enb_id: String,
    #[serde(default = "default_enb_name")]
    pub name: String,
    pub mcc: u16,
    pub mnc: u16,
    pub mme_addr: String,
    #[serde(default = "default_gtp_bind_addr")]
    pub gtp_bind_addr: String,
    #[serde(default = "default_s1c_bind_addr")]
    pub s1c_bind_addr: String,
    #[serde(default = "default_nof_ports")]
    pub nof_ports: u8,
    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_enb_name() -> String {
    "nbiot-enb".to_string()
}
fn default_gtp_bind_addr() -> String {
    "127.0.0.1".to_string()
}
fn default_s1c_bind_addr() -> String {
    "127.0.0.1".to_string()
}
fn default_nof_ports() -> u8 {
    1
}
fn default_mode() -> String {
    "nbiot".to_string()
}

/// `enb_files {sib_config, rr_config, drb_config}`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EnbFilesConfig {
    pub sib_config: Option<String>,
    pub rr_config: Option<String>,
    pub drb_config: Option<String>,
}

/// `cell.{pci, mode, dl_earfcn, ul_earfcn, dl_raster_offset, ul_carrier_freq_offset}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CellConfig {
    /// Physical cell id, `0..503`.
    pub pci: u16,
    /// `{standalone, guardband, inband_same_pci, inband_diff_pci}`.
    pub mode: String,
    pub dl_earfcn: u32,
    pub ul_earfcn: u32,
    /// Applied as `+k kHz` (DL) per 36.104 §5.7.3, iff `mode != standalone`.
    #[serde(default)]
    pub dl_raster_offset: i32,
    /// Applied as `+2.5*k kHz` (UL) per 36.104 §5.7.3, iff `mode != standalone`.
    #[serde(default)]
    pub ul_carrier_freq_offset: i32,
    /// `operationModeInfo`'s 4-bit mode-specific parameter (carrier number
    /// within the host LTE carrier); unused for standalone.
    #[serde(default)]
    pub mode_parameter: u8,
    /// NPRACH subcarrier offset (`nprach-SubcarrierOffset`).
    #[serde(default)]
    pub nprach_base_subc: usize,
}

impl CellConfig {
    /// Parse `mode` into the PHY's operation mode. `inband_same_pci` and
    /// `inband_diff_pci` both select `OperationMode::InBand`: the same/
    /// different-cell-id distinction only affects `operationModeInfo`
    /// encoding, which this surface doesn't expose separately (see
    /// `PhyConfig::operation_mode_info`, which always assumes same-cell-id
    /// for in-band deployments).
    pub fn operation_mode(&self) -> anyhow::Result<OperationMode> {
        match self.mode.as_str() {
            "standalone" => Ok(OperationMode::Standalone),
            "guardband" => Ok(OperationMode::GuardBand),
            "inband_same_pci" | "inband_diff_pci" => Ok(OperationMode::InBand),
            other => Err(anyhow::anyhow!("unknown cell.mode: {}", other)),
        }
    }

    pub fn pci(&self) -> anyhow::Result<Pci> {
        Pci::new(self.pci).ok_or_else(|| anyhow::anyhow!("invalid cell.pci: {}", self.pci))
    }
}

/// `rr.mac_cnfg.*` and `rr.phy.*`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RrConfig {
    #[serde(default)]
    pub mac_cnfg: MacCnfgConfig,
    #[serde(default)]
    pub phy: RrPhyConfig,
}

/// `rr.mac_cnfg.{ul_sch_cfg.*, time_alignment_timer}`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct MacCnfgConfig {
    #[serde(default)]
    pub ul_sch_cfg: UlSchCfgConfig,
    #[serde(default = "default_time_alignment_timer")]
    pub time_alignment_timer: u32,
}

fn default_time_alignment_timer() -> u32 {
    10_240 // "infinity" sentinel, matching 36.331's timeAlignmentTimer-r13
}

/// `rr.mac_cnfg.ul_sch_cfg.{periodic_bsr_timer, retx_bsr_timer}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UlSchCfgConfig {
    #[serde(default = "default_bsr_timer")]
    pub periodic_bsr_timer: u32,
    #[serde(default = "default_bsr_timer")]
    pub retx_bsr_timer: u32,
}

impl Default for UlSchCfgConfig {
    fn default() -> Self {
        Self {
            periodic_bsr_timer: default_bsr_timer(),
            retx_bsr_timer: default_bsr_timer(),
        }
    }
}

fn default_bsr_timer() -> u32 {
    10_240
}

/// `rr.phy.{npdcch_cnfg_ded, npusch_cnfg_ded}`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RrPhyConfig {
    #[serde(default)]
    pub npdcch_cnfg_ded: NpdcchCnfgDedConfig,
    #[serde(default)]
    pub npusch_cnfg_ded: NpuschCnfgDedConfig,
}

/// `rr.phy.npdcch_cnfg_ded.{npdcch_numrepetition, npdcch_start_sf_uss, npdcch_offset_uss}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NpdcchCnfgDedConfig {
    #[serde(default = "default_npdcch_numrepetition")]
    pub npdcch_numrepetition: u16,
    #[serde(default)]
    pub npdcch_start_sf_uss: u8,
    #[serde(default)]
    pub npdcch_offset_uss: u8,
}

impl Default for NpdcchCnfgDedConfig {
    fn default() -> Self {
        Self {
            npdcch_numrepetition: default_npdcch_numrepetition(),
            npdcch_start_sf_uss: 0,
            npdcch_offset_uss: 0,
        }
    }
}

fn default_npdcch_numrepetition() -> u16 {
    1
}

/// `rr.phy.npusch_cnfg_ded.{ack_nack_numrepetition, npusch_all_symbols}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NpuschCnfgDedConfig {
    #[serde(default = "default_ack_nack_numrepetition")]
    pub ack_nack_numrepetition: u16,
    #[serde(default = "default_npusch_all_symbols")]
    pub npusch_all_symbols: bool,
}

impl Default for NpuschCnfgDedConfig {
    fn default() -> Self {
        Self {
            ack_nack_numrepetition: default_ack_nack_numrepetition(),
            npusch_all_symbols: default_npusch_all_symbols(),
        }
    }
}

fn default_ack_nack_numrepetition() -> u16 {
    1
}
fn default_npusch_all_symbols() -> bool {
    true
}

/// SIB1-NB fields (spec.md §6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Sib1ConfigYaml {
    #[serde(default)]
    pub intra_freq_reselection: bool,
    #[serde(default)]
    pub cell_barred: bool,
    #[serde(default)]
    pub q_rx_lev_min: i8,
    #[serde(default = "default_si_window_length_ms")]
    pub si_window_length_ms: u16,
    /// `schedulingInfoSIB1`, the 4-bit MIB-NB field selecting SIB1-NB's own
    /// repetition count/offset (36.331 Table 7.1.1-1). Distinct from
    /// `sched_info[]` below, which schedules the *other* SIBs within SIB1.
    #[serde(default)]
    pub sched_info_sib1: u8,
    /// SI scheduling entries for SIB2/SIB3/... carried inside SIB1-NB;
    /// opaque to the PHY/MAC boundary, passed through only for completeness.
    #[serde(default)]
    pub sched_info: Vec<u8>,
    pub freq_band_ind: u16,
    pub plmn_id: Vec<String>,
    #[serde(default)]
    pub tac: u32,
}

fn default_si_window_length_ms() -> u16 {
    160
}

impl Sib1ConfigYaml {
    pub fn into_sib1_config(&self, cell_id: CellId) -> anyhow::Result<Sib1Config> {
        let sched_info_sib1 = self.sched_info_sib1;
        let plmn_ids = self
            .plmn_id
            .iter()
            .map(|p| plmn_id_from_digits(p))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Sib1Config {
            cell_id,
            plmn_ids,
            tac: self.tac,
            intra_freq_reselection: self.intra_freq_reselection,
            cell_barred: self.cell_barred,
            q_rx_lev_min: self.q_rx_lev_min,
            si_window_length_ms: self.si_window_length_ms,
            sched_info_sib1,
            freq_band_indicator: self.freq_band_ind,
        })
    }
}

/// Parse a PLMN string (e.g. `"00101"`) into a `PlmnId`.
fn plmn_id_from_digits(plmn: &str) -> anyhow::Result<PlmnId> {
    if plmn.len() < 5 || plmn.len() > 6 {
        return Err(anyhow::anyhow!("invalid PLMN format: {}", plmn));
    }
    let digits: Vec<u8> = plmn
        .chars()
        .map(|c| c.to_digit(10).map(|d| d as u8))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| anyhow::anyhow!("invalid PLMN digits: {}", plmn))?;
    let mcc = [digits[0], digits[1], digits[2]];
    let mnc = digits[3..].to_vec();
    Ok(PlmnId { mcc, mnc })
}

/// SIB2-NB common radio-resource parameters. Kept narrow: these values are
/// parsed and carried but, per spec.md's scope, not consumed by a scheduler
/// timer model beyond what `rr.mac_cnfg`/`rr.phy` already configure.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Sib2ConfigYaml {
    #[serde(default)]
    pub rach: serde_yaml::Value,
    #[serde(default)]
    pub bcch: serde_yaml::Value,
    #[serde(default)]
    pub pcch: serde_yaml::Value,
    #[serde(default)]
    pub nprach: serde_yaml::Value,
    #[serde(default)]
    pub npdsch: serde_yaml::Value,
    #[serde(default)]
    pub npusch: serde_yaml::Value,
    #[serde(default)]
    pub dl_gap: serde_yaml::Value,
    #[serde(default)]
    pub ul_pwr_ctrl: serde_yaml::Value,
}

/// `rf {dl_earfcn, rx_gain, tx_gain, dl_freq, ul_freq, device_name, device_args, time_adv_nsamples}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RfConfig {
    #[serde(default)]
    pub dl_earfcn: u32,
    #[serde(default)]
    pub rx_gain: f32,
    #[serde(default)]
    pub tx_gain: f32,
    #[serde(default)]
    pub dl_freq: f64,
    #[serde(default)]
    pub ul_freq: f64,
    #[serde(default = "default_device_name")]
    pub device_name: String,
    pub device_args: String,
    #[serde(default)]
    pub time_adv_nsamples: i32,
}

fn default_device_name() -> String {
    "zmq".to_string()
}

impl RfConfig {
    pub fn to_zmq_rf_config(&self) -> anyhow::Result<ZmqRfConfig> {
        let mut config = ZmqRfConfig::from_device_args(&self.device_args, 1)
            .map_err(|e| anyhow::anyhow!("invalid rf.device_args: {}", e))?;
        config.tx_gain = self.tx_gain;
        config.rx_gain = self.rx_gain;
        Ok(config)
    }
}

/// `log {*_level, *_hex_limit, all_level, all_hex_limit, filename, file_max_size}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    pub filename: Option<String>,
    #[serde(default = "default_file_max_size")]
    pub file_max_size: i64,
    #[serde(default = "default_log_level")]
    pub all_level: String,
    #[serde(default = "default_hex_limit")]
    pub all_hex_limit: i32,
    #[serde(default = "default_log_level")]
    pub phy_level: String,
    #[serde(default = "default_hex_limit")]
    pub phy_hex_limit: i32,
    #[serde(default = "default_log_level")]
    pub mac_level: String,
    #[serde(default = "default_hex_limit")]
    pub mac_hex_limit: i32,
    #[serde(default = "default_log_level")]
    pub rlc_level: String,
    #[serde(default = "default_hex_limit")]
    pub rlc_hex_limit: i32,
    #[serde(default = "default_log_level")]
    pub pdcp_level: String,
    #[serde(default = "default_hex_limit")]
    pub pdcp_hex_limit: i32,
    #[serde(default = "default_log_level")]
    pub rrc_level: String,
    #[serde(default = "default_hex_limit")]
    pub rrc_hex_limit: i32,
    #[serde(default = "default_log_level")]
    pub s1ap_level: String,
    #[serde(default = "default_hex_limit")]
    pub s1ap_hex_limit: i32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filename: None,
            file_max_size: default_file_max_size(),
            all_level: default_log_level(),
            all_hex_limit: default_hex_limit(),
            phy_level: default_log_level(),
            phy_hex_limit: default_hex_limit(),
            mac_level: default_log_level(),
            mac_hex_limit: default_hex_limit(),
            rlc_level: default_log_level(),
            rlc_hex_limit: default_hex_limit(),
            pdcp_level: default_log_level(),
            pdcp_hex_limit: default_hex_limit(),
            rrc_level: default_log_level(),
            rrc_hex_limit: default_hex_limit(),
            s1ap_level: default_log_level(),
            s1ap_hex_limit: default_hex_limit(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_hex_limit() -> i32 {
    -1
}
fn default_file_max_size() -> i64 {
    -1
}

impl LogConfig {
    /// Build a `tracing_subscriber::EnvFilter` directive string from the
    /// per-layer levels, e.g. `"info,layers::phy=debug,layers::mac=warn"`.
    pub fn to_env_filter_directive(&self) -> String {
        format!(
            "{},layers::phy={},layers::mac={},layers::rlc={},layers::pdcp={},layers::rrc={},layers::s1ap={}",
            self.all_level, self.phy_level, self.mac_level, self.rlc_level,
            self.pdcp_level, self.rrc_level, self.s1ap_level,
        )
    }
}

/// `pcap {enable, filename, s1ap_enable, s1ap_filename}`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PcapConfig {
    #[serde(default)]
    pub enable: bool,
    pub filename: Option<String>,
    #[serde(default)]
    pub s1ap_enable: bool,
    pub s1ap_filename: Option<String>,
}

/// `expert {emulate_nprach, allow_decode_stub_data}`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ExpertConfig {
    #[serde(default)]
    pub emulate_nprach: bool,
    /// Gates the reference's "assume correct and forward stub data" hack
    /// for fixed TB sizes (spec.md §7, open question 1). Defaults to off.
    #[serde(default)]
    pub allow_decode_stub_data: bool,
}

/// Parse a PLMN string (e.g. `"00101"`) into (mcc, mnc), used by the CLI/
/// logging layer to render a human-readable PLMN.
pub fn parse_plmn(plmn: &str) -> anyhow::Result<(u16, u16)> {
    if plmn.len() < 5 || plmn.len() > 6 {
        return Err(anyhow::anyhow!("invalid PLMN format: {}", plmn));
    }
    let mcc = plmn[0..3].parse::<u16>()?;
    let mnc = plmn[3..].parse::<u16>()?;
    Ok((mcc, mnc))
}

impl EnbConfig {
    pub fn from_yaml_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: EnbConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn cell_id(&self) -> CellId {
        CellId(self.general.enb_id.parse::<u32>().unwrap_or(1))
    }

    pub fn to_phy_config(&self) -> anyhow::Result<PhyConfig> {
        Ok(PhyConfig {
            pci: self.cell.pci()?,
            cell_id: self.cell_id(),
            operation_mode: self.cell.operation_mode()?,
            mode_parameter: self.cell.mode_parameter,
            sched_info_sib1: self.sib1.sched_info_sib1,
            system_info_value_tag: 0,
            access_barring_enabled: self.sib1.cell_barred,
            nprach_base_subc: self.cell.nprach_base_subc,
            emulate_nprach: self.expert.emulate_nprach,
        })
    }

    pub fn to_mac_config(&self) -> anyhow::Result<MacConfig> {
        Ok(MacConfig {
            cell_id: self.cell_id(),
            sib1_config: self.sib1.into_sib1_config(self.cell_id())?,
            mac_pcap_path: self
                .pcap
                .enable
                .then(|| self.pcap.filename.clone().unwrap_or_else(|| "enb_mac.pcap".to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plmn_5_digit() {
        let (mcc, mnc) = parse_plmn("00101").unwrap();
        assert_eq!(mcc, 1);
        assert_eq!(mnc, 1);
    }

    #[test]
    fn test_parse_plmn_6_digit() {
        let (mcc, mnc) = parse_plmn("310260").unwrap();
        assert_eq!(mcc, 310);
        assert_eq!(mnc, 260);
    }

    #[test]
    fn test_cell_config_operation_mode() {
        let cell = CellConfig {
            pci: 123,
            mode: "inband_same_pci".to_string(),
            dl_earfcn: 3755,
            ul_earfcn: 21755,
            dl_raster_offset: 0,
            ul_carrier_freq_offset: 0,
            mode_parameter: 0,
            nprach_base_subc: 0,
        };
        assert_eq!(cell.operation_mode().unwrap(), OperationMode::InBand);
    }

    #[test]
    fn test_cell_config_rejects_unknown_mode() {
        let cell = CellConfig {
            pci: 0,
            mode: "bogus".to_string(),
            dl_earfcn: 0,
            ul_earfcn: 0,
            dl_raster_offset: 0,
            ul_carrier_freq_offset: 0,
            mode_parameter: 0,
            nprach_base_subc: 0,
        };
        assert!(cell.operation_mode().is_err());
    }

    #[test]
    fn test_plmn_id_from_digits() {
        let plmn = plmn_id_from_digits("00101").unwrap();
        assert_eq!(plmn.mcc, [0, 0, 1]);
        assert_eq!(plmn.mnc, vec![0, 1]);
    }
}
