use serde::{Deserialize, Serialize};

use crate::config::{BLOCK_FREQUENCY, COIN_PRECISION, SECTOR_SIZE};
use crate::currency::Currency;
use crate::serializer::{Reader, ReaderError, Serializer, Writer};

// The host's operator-facing configuration. Field names are part of the
// HTTP contract, hence the explicit renames.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInternalSettings {
    #[serde(rename = "acceptingcontracts")]
    pub accepting_contracts: bool,
    #[serde(rename = "maxduration")]
    pub max_duration: u64,
    #[serde(rename = "maxdownloadbatchsize")]
    pub max_download_batch_size: u64,
    #[serde(rename = "maxrevisebatchsize")]
    pub max_revise_batch_size: u64,
    #[serde(rename = "netaddress")]
    pub net_address: String,
    #[serde(rename = "windowsize")]
    pub window_size: u64,

    pub collateral: Currency,
    #[serde(rename = "collateralbudget")]
    pub collateral_budget: Currency,
    // parts per million of the contract payout the host will risk
    #[serde(rename = "maxcollateralfraction")]
    pub max_collateral_fraction: u64,
    #[serde(rename = "maxcollateral")]
    pub max_collateral: Currency,

    #[serde(rename = "downloadlimitgrowth")]
    pub download_limit_growth: u64,
    #[serde(rename = "downloadlimitcap")]
    pub download_limit_cap: u64,
    #[serde(rename = "downloadspeedlimit")]
    pub download_speed_limit: u64,
    #[serde(rename = "uploadlimitgrowth")]
    pub upload_limit_growth: u64,
    #[serde(rename = "uploadlimitcap")]
    pub upload_limit_cap: u64,
    #[serde(rename = "uploadspeedlimit")]
    pub upload_speed_limit: u64,

    #[serde(rename = "minimumcontractprice")]
    pub minimum_contract_price: Currency,
    #[serde(rename = "minimumdownloadbandwidthprice")]
    pub minimum_download_bandwidth_price: Currency,
    #[serde(rename = "minimumstorageprice")]
    pub minimum_storage_price: Currency,
    #[serde(rename = "minimumuploadbandwidthprice")]
    pub minimum_upload_bandwidth_price: Currency,
}

impl Default for HostInternalSettings {
    fn default() -> Self {
        HostInternalSettings {
            accepting_contracts: false,
            max_duration: 144 * 30 * 6, // ~6 months of blocks
            max_download_batch_size: 17 * (1 << 20),
            max_revise_batch_size: 17 * (1 << 20),
            net_address: String::new(),
            window_size: 144,

            collateral: Currency::new(COIN_PRECISION / 10 / SECTOR_SIZE as u128 / BLOCK_FREQUENCY as u128),
            collateral_budget: Currency::from_coins(100_000),
            max_collateral_fraction: 400_000,
            max_collateral: Currency::from_coins(5_000),

            download_limit_growth: 0,
            download_limit_cap: 0,
            download_speed_limit: 0,
            upload_limit_growth: 0,
            upload_limit_cap: 0,
            upload_speed_limit: 0,

            minimum_contract_price: Currency::ZERO,
            minimum_download_bandwidth_price: Currency::new(COIN_PRECISION / (1 << 20)),
            minimum_storage_price: Currency::new(COIN_PRECISION / 10 / SECTOR_SIZE as u128 / BLOCK_FREQUENCY as u128),
            minimum_upload_bandwidth_price: Currency::new(COIN_PRECISION / (1 << 22)),
        }
    }
}

impl Serializer for HostInternalSettings {
    fn write(&self, writer: &mut Writer) {
        writer.write_bool(self.accepting_contracts);
        writer.write_u64(self.max_duration);
        writer.write_u64(self.max_download_batch_size);
        writer.write_u64(self.max_revise_batch_size);
        writer.write_string(&self.net_address);
        writer.write_u64(self.window_size);
        self.collateral.write(writer);
        self.collateral_budget.write(writer);
        writer.write_u64(self.max_collateral_fraction);
        self.max_collateral.write(writer);
        writer.write_u64(self.download_limit_growth);
        writer.write_u64(self.download_limit_cap);
        writer.write_u64(self.download_speed_limit);
        writer.write_u64(self.upload_limit_growth);
        writer.write_u64(self.upload_limit_cap);
        writer.write_u64(self.upload_speed_limit);
        self.minimum_contract_price.write(writer);
        self.minimum_download_bandwidth_price.write(writer);
        self.minimum_storage_price.write(writer);
        self.minimum_upload_bandwidth_price.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(HostInternalSettings {
            accepting_contracts: reader.read_bool()?,
            max_duration: reader.read_u64()?,
            max_download_batch_size: reader.read_u64()?,
            max_revise_batch_size: reader.read_u64()?,
            net_address: reader.read_string()?,
            window_size: reader.read_u64()?,
            collateral: Currency::read(reader)?,
            collateral_budget: Currency::read(reader)?,
            max_collateral_fraction: reader.read_u64()?,
            max_collateral: Currency::read(reader)?,
            download_limit_growth: reader.read_u64()?,
            download_limit_cap: reader.read_u64()?,
            download_speed_limit: reader.read_u64()?,
            upload_limit_growth: reader.read_u64()?,
            upload_limit_cap: reader.read_u64()?,
            upload_speed_limit: reader.read_u64()?,
            minimum_contract_price: Currency::read(reader)?,
            minimum_download_bandwidth_price: Currency::read(reader)?,
            minimum_storage_price: Currency::read(reader)?,
            minimum_upload_bandwidth_price: Currency::read(reader)?,
        })
    }
}

// Revenue and risk counters. These only ever increase (lost categories
// included); the API exposes them for operator dashboards.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFinancialMetrics {
    #[serde(rename = "contractcompensation")]
    pub contract_compensation: Currency,
    #[serde(rename = "storagerevenue")]
    pub storage_revenue: Currency,
    #[serde(rename = "downloadbandwidthrevenue")]
    pub download_bandwidth_revenue: Currency,
    #[serde(rename = "uploadbandwidthrevenue")]
    pub upload_bandwidth_revenue: Currency,
    #[serde(rename = "lockedcollateral")]
    pub locked_collateral: Currency,
    #[serde(rename = "riskedcollateral")]
    pub risked_collateral: Currency,
    #[serde(rename = "lostcollateral")]
    pub lost_collateral: Currency,
}

impl Serializer for HostFinancialMetrics {
    fn write(&self, writer: &mut Writer) {
        self.contract_compensation.write(writer);
        self.storage_revenue.write(writer);
        self.download_bandwidth_revenue.write(writer);
        self.upload_bandwidth_revenue.write(writer);
        self.locked_collateral.write(writer);
        self.risked_collateral.write(writer);
        self.lost_collateral.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(HostFinancialMetrics {
            contract_compensation: Currency::read(reader)?,
            storage_revenue: Currency::read(reader)?,
            download_bandwidth_revenue: Currency::read(reader)?,
            upload_bandwidth_revenue: Currency::read(reader)?,
            locked_collateral: Currency::read(reader)?,
            risked_collateral: Currency::read(reader)?,
            lost_collateral: Currency::read(reader)?,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageFolderInfo {
    pub path: String,
    pub capacity: u64,
    #[serde(rename = "capacityremaining")]
    pub capacity_remaining: u64,
}

// What a host advertises to renters over its listener: identity, prices and
// capacity. Renters pull this before forming or using a contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostExternalSettings {
    #[serde(rename = "acceptingcontracts")]
    pub accepting_contracts: bool,
    #[serde(rename = "netaddress")]
    pub net_address: String,
    #[serde(rename = "publickey")]
    pub public_key: crate::crypto::PublicKey,
    #[serde(rename = "remainingstorage")]
    pub remaining_storage: u64,
    #[serde(rename = "windowsize")]
    pub window_size: u64,
    #[serde(rename = "maxduration")]
    pub max_duration: u64,
    pub collateral: Currency,
    #[serde(rename = "contractprice")]
    pub contract_price: Currency,
    #[serde(rename = "storageprice")]
    pub storage_price: Currency,
    #[serde(rename = "downloadbandwidthprice")]
    pub download_bandwidth_price: Currency,
    #[serde(rename = "uploadbandwidthprice")]
    pub upload_bandwidth_price: Currency,
    pub version: String,
}

impl Serializer for HostExternalSettings {
    fn write(&self, writer: &mut Writer) {
        writer.write_bool(self.accepting_contracts);
        writer.write_string(&self.net_address);
        self.public_key.write(writer);
        writer.write_u64(self.remaining_storage);
        writer.write_u64(self.window_size);
        writer.write_u64(self.max_duration);
        self.collateral.write(writer);
        self.contract_price.write(writer);
        self.storage_price.write(writer);
        self.download_bandwidth_price.write(writer);
        self.upload_bandwidth_price.write(writer);
        writer.write_string(&self.version);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(HostExternalSettings {
            accepting_contracts: reader.read_bool()?,
            net_address: reader.read_string()?,
            public_key: crate::crypto::PublicKey::read(reader)?,
            remaining_storage: reader.read_u64()?,
            window_size: reader.read_u64()?,
            max_duration: reader.read_u64()?,
            collateral: Currency::read(reader)?,
            contract_price: Currency::read(reader)?,
            storage_price: Currency::read(reader)?,
            download_bandwidth_price: Currency::read(reader)?,
            upload_bandwidth_price: Currency::read(reader)?,
            version: reader.read_string()?,
        })
    }
}
