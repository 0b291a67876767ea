use serde::{Deserialize, Serialize};

use crate::crypto::{Hash, PublicKey};
use crate::currency::Currency;
use crate::serializer::{Reader, ReaderError, Serializer, Writer};

// Renter-side budget controlling contract formation. All-zero means
// cancelled: no new contracts, no renewals.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowance {
    pub funds: Currency,
    pub hosts: u64,
    pub period: u64,
    #[serde(rename = "renewwindow")]
    pub renew_window: u64,
}

impl Allowance {
    pub fn active(&self) -> bool {
        !(self.funds.is_zero() && self.hosts == 0 && self.period == 0 && self.renew_window == 0)
    }
}

impl Serializer for Allowance {
    fn write(&self, writer: &mut Writer) {
        self.funds.write(writer);
        writer.write_u64(self.hosts);
        writer.write_u64(self.period);
        writer.write_u64(self.renew_window);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Allowance {
            funds: Currency::read(reader)?,
            hosts: reader.read_u64()?,
            period: reader.read_u64()?,
            renew_window: reader.read_u64()?,
        })
    }

    fn size(&self) -> usize {
        16 + 8 + 8 + 8
    }
}

// Multiplicative score breakdown. Every dimension keeps a nonzero baseline:
// a zero means the dimension stopped being reported and breaks clients, and
// an exact 1.0 means the dimension is not ranking anything at all.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostScoreBreakdown {
    pub score: f64,
    #[serde(rename = "ageadjustment")]
    pub age_adjustment: f64,
    #[serde(rename = "burnadjustment")]
    pub burn_adjustment: f64,
    #[serde(rename = "collateraladjustment")]
    pub collateral_adjustment: f64,
    #[serde(rename = "priceadjustment")]
    pub price_adjustment: f64,
    #[serde(rename = "storageremainingadjustment")]
    pub storage_remaining_adjustment: f64,
    #[serde(rename = "uptimeadjustment")]
    pub uptime_adjustment: f64,
    #[serde(rename = "versionadjustment")]
    pub version_adjustment: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostDbEntryInfo {
    #[serde(rename = "publickey")]
    pub public_key: PublicKey,
    #[serde(rename = "netaddress")]
    pub net_address: String,
    #[serde(rename = "acceptingcontracts")]
    pub accepting_contracts: bool,
    #[serde(rename = "remainingstorage")]
    pub remaining_storage: u64,
    #[serde(rename = "storageprice")]
    pub storage_price: Currency,
    pub collateral: Currency,
    pub version: String,
    #[serde(rename = "firstseen")]
    pub first_seen: u64,
    #[serde(rename = "historicuptime")]
    pub historic_uptime: u64,
    #[serde(rename = "historicdowntime")]
    pub historic_downtime: u64,
    #[serde(rename = "scorebreakdown")]
    pub score_breakdown: HostScoreBreakdown,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileInfo {
    pub siapath: String,
    pub filesize: u64,
    pub available: bool,
    pub renewing: bool,
    pub redundancy: f64,
    #[serde(rename = "uploadprogress")]
    pub upload_progress: f64,
    pub expiration: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadInfo {
    pub siapath: String,
    pub destination: String,
    pub filesize: u64,
    pub received: u64,
    #[serde(rename = "starttime")]
    pub start_time: u64,
    pub error: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenterContractInfo {
    pub id: Hash,
    #[serde(rename = "hostpublickey")]
    pub host_public_key: PublicKey,
    #[serde(rename = "netaddress")]
    pub net_address: String,
    #[serde(rename = "renterfunds")]
    pub renter_funds: Currency,
    #[serde(rename = "endheight")]
    pub end_height: u64,
    pub size: u64,
}
