use sia_common::crypto::{Hash, PublicKey};
use sia_common::currency::Currency;
use sia_common::serializer::{Reader, ReaderError, Serializer, Writer};

// Renter-side record of a formed file contract: enough to pay for, locate
// and renew storage with one host.
#[derive(Clone, Debug)]
pub struct RenterContract {
    pub id: Hash,
    pub host_public_key: PublicKey,
    // end of the usable period; the proof window opens here
    pub end_height: u64,
    pub renter_funds: Currency,
    // bytes of sectors stored under this contract
    pub size: u64,
    // retired contracts stay around for downloads but are never renewed
    pub retired: bool,
}

impl RenterContract {
    pub fn new(
        id: Hash,
        host_public_key: PublicKey,
        end_height: u64,
        renter_funds: Currency,
    ) -> Self {
        RenterContract {
            id,
            host_public_key,
            end_height,
            renter_funds,
            size: 0,
            retired: false,
        }
    }
}

impl Serializer for RenterContract {
    fn write(&self, writer: &mut Writer) {
        writer.write_hash(&self.id);
        self.host_public_key.write(writer);
        writer.write_u64(self.end_height);
        self.renter_funds.write(writer);
        writer.write_u64(self.size);
        writer.write_bool(self.retired);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(RenterContract {
            id: reader.read_hash()?,
            host_public_key: PublicKey::read(reader)?,
            end_height: reader.read_u64()?,
            renter_funds: Currency::read(reader)?,
            size: reader.read_u64()?,
            retired: reader.read_bool()?,
        })
    }
}
