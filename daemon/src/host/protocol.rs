use sia_common::api::host::HostExternalSettings;
use sia_common::crypto::Hash;
use sia_common::serializer::{read_list, write_list, Reader, ReaderError, Serializer, Writer};
use sia_common::transaction::Transaction;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::MAX_PACKET_SIZE;

// Renter-facing RPC surface: one request, one response per round trip over
// a fresh connection. The negotiation protocol stays deliberately narrow.
#[derive(Clone, Debug)]
pub enum HostRequest {
    Settings,
    // the renter built, funded and signed the formation set; the contract
    // is the last transaction's first file contract
    FormContract { transaction_set: Vec<Transaction> },
    RenewContract {
        old_contract_id: Hash,
        transaction_set: Vec<Transaction>,
    },
    UploadSector { contract_id: Hash, data: Vec<u8> },
    DownloadSector { contract_id: Hash, root: Hash },
}

#[derive(Clone, Debug)]
pub enum HostResponse {
    Settings(HostExternalSettings),
    ContractAccepted { contract_id: Hash },
    SectorStored { root: Hash },
    Sector { data: Vec<u8> },
    Error { message: String },
}

const REQ_SETTINGS: u8 = 0;
const REQ_FORM_CONTRACT: u8 = 1;
const REQ_RENEW_CONTRACT: u8 = 2;
const REQ_UPLOAD_SECTOR: u8 = 3;
const REQ_DOWNLOAD_SECTOR: u8 = 4;

const RESP_SETTINGS: u8 = 0;
const RESP_CONTRACT_ACCEPTED: u8 = 1;
const RESP_SECTOR_STORED: u8 = 2;
const RESP_SECTOR: u8 = 3;
const RESP_ERROR: u8 = 4;

impl Serializer for HostRequest {
    fn write(&self, writer: &mut Writer) {
        match self {
            HostRequest::Settings => writer.write_u8(REQ_SETTINGS),
            HostRequest::FormContract { transaction_set } => {
                writer.write_u8(REQ_FORM_CONTRACT);
                write_list(writer, transaction_set);
            }
            HostRequest::RenewContract {
                old_contract_id,
                transaction_set,
            } => {
                writer.write_u8(REQ_RENEW_CONTRACT);
                writer.write_hash(old_contract_id);
                write_list(writer, transaction_set);
            }
            HostRequest::UploadSector { contract_id, data } => {
                writer.write_u8(REQ_UPLOAD_SECTOR);
                writer.write_hash(contract_id);
                data.write(writer);
            }
            HostRequest::DownloadSector { contract_id, root } => {
                writer.write_u8(REQ_DOWNLOAD_SECTOR);
                writer.write_hash(contract_id);
                writer.write_hash(root);
            }
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(match reader.read_u8()? {
            REQ_SETTINGS => HostRequest::Settings,
            REQ_FORM_CONTRACT => HostRequest::FormContract {
                transaction_set: read_list(reader)?,
            },
            REQ_RENEW_CONTRACT => HostRequest::RenewContract {
                old_contract_id: reader.read_hash()?,
                transaction_set: read_list(reader)?,
            },
            REQ_UPLOAD_SECTOR => HostRequest::UploadSector {
                contract_id: reader.read_hash()?,
                data: Vec::<u8>::read(reader)?,
            },
            REQ_DOWNLOAD_SECTOR => HostRequest::DownloadSector {
                contract_id: reader.read_hash()?,
                root: reader.read_hash()?,
            },
            _ => return Err(ReaderError::InvalidValue),
        })
    }
}

impl Serializer for HostResponse {
    fn write(&self, writer: &mut Writer) {
        match self {
            HostResponse::Settings(settings) => {
                writer.write_u8(RESP_SETTINGS);
                settings.write(writer);
            }
            HostResponse::ContractAccepted { contract_id } => {
                writer.write_u8(RESP_CONTRACT_ACCEPTED);
                writer.write_hash(contract_id);
            }
            HostResponse::SectorStored { root } => {
                writer.write_u8(RESP_SECTOR_STORED);
                writer.write_hash(root);
            }
            HostResponse::Sector { data } => {
                writer.write_u8(RESP_SECTOR);
                data.write(writer);
            }
            HostResponse::Error { message } => {
                writer.write_u8(RESP_ERROR);
                writer.write_string(message);
            }
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(match reader.read_u8()? {
            RESP_SETTINGS => HostResponse::Settings(HostExternalSettings::read(reader)?),
            RESP_CONTRACT_ACCEPTED => HostResponse::ContractAccepted {
                contract_id: reader.read_hash()?,
            },
            RESP_SECTOR_STORED => HostResponse::SectorStored {
                root: reader.read_hash()?,
            },
            RESP_SECTOR => HostResponse::Sector {
                data: Vec::<u8>::read(reader)?,
            },
            RESP_ERROR => HostResponse::Error {
                message: reader.read_string()?,
            },
            _ => return Err(ReaderError::InvalidValue),
        })
    }
}

// Shared framing: u32 length prefix, then the encoded value
pub async fn read_frame<T: Serializer>(stream: &mut TcpStream) -> std::io::Result<T> {
    let len = stream.read_u32().await?;
    if len == 0 || len > MAX_PACKET_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "oversized frame",
        ));
    }
    let mut buffer = vec![0u8; len as usize];
    stream.read_exact(&mut buffer).await?;
    T::from_bytes(&buffer)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}

pub async fn write_frame<T: Serializer>(stream: &mut TcpStream, value: &T) -> std::io::Result<()> {
    let bytes = value.to_bytes();
    stream.write_u32(bytes.len() as u32).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await
}

// One renter-side round trip against a host listener
pub async fn host_round_trip(
    address: &str,
    request: &HostRequest,
) -> std::io::Result<HostResponse> {
    let mut stream = TcpStream::connect(address).await?;
    write_frame(&mut stream, request).await?;
    read_frame(&mut stream).await
}
