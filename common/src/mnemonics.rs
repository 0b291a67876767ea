use bip39::{Language, Mnemonic};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

pub const SEED_SIZE: usize = 32;

pub type SeedBytes = [u8; SEED_SIZE];

#[derive(Error, Debug)]
pub enum MnemonicError {
    #[error("invalid dictionary name '{0}'")]
    UnknownDictionary(String),
    #[error("invalid mnemonic phrase")]
    InvalidPhrase,
    #[error("mnemonic does not encode a {SEED_SIZE}-byte seed")]
    InvalidEntropy,
}

// Word list used to render a seed. Parsing tries each dictionary in
// declaration order, so a phrase never needs its dictionary named.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dictionary {
    English,
    Japanese,
    French,
}

pub const ALL_DICTIONARIES: [Dictionary; 3] =
    [Dictionary::English, Dictionary::Japanese, Dictionary::French];

impl Dictionary {
    fn language(&self) -> Language {
        match self {
            Dictionary::English => Language::English,
            Dictionary::Japanese => Language::Japanese,
            Dictionary::French => Language::French,
        }
    }
}

impl Default for Dictionary {
    fn default() -> Self {
        Dictionary::English
    }
}

impl Display for Dictionary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dictionary::English => "english",
            Dictionary::Japanese => "japanese",
            Dictionary::French => "french",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Dictionary {
    type Err = MnemonicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "english" => Ok(Dictionary::English),
            "japanese" => Ok(Dictionary::Japanese),
            "french" => Ok(Dictionary::French),
            other => Err(MnemonicError::UnknownDictionary(other.to_string())),
        }
    }
}

pub fn seed_to_mnemonic(seed: &SeedBytes, dictionary: Dictionary) -> Result<String, MnemonicError> {
    let mnemonic = Mnemonic::from_entropy_in(dictionary.language(), seed)
        .map_err(|_| MnemonicError::InvalidEntropy)?;
    Ok(mnemonic.to_string())
}

// Try every dictionary in order; report which one matched
pub fn mnemonic_to_seed(phrase: &str) -> Result<(SeedBytes, Dictionary), MnemonicError> {
    for dictionary in ALL_DICTIONARIES {
        if let Ok(mnemonic) = Mnemonic::parse_in_normalized(dictionary.language(), phrase) {
            let entropy = mnemonic.to_entropy();
            let seed: SeedBytes = entropy
                .try_into()
                .map_err(|_| MnemonicError::InvalidEntropy)?;
            return Ok((seed, dictionary));
        }
    }
    Err(MnemonicError::InvalidPhrase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_every_dictionary() {
        let seed: SeedBytes = [0xAB; SEED_SIZE];
        for dictionary in ALL_DICTIONARIES {
            let phrase = seed_to_mnemonic(&seed, dictionary).unwrap();
            let (decoded, detected) = mnemonic_to_seed(&phrase).unwrap();
            assert_eq!(seed, decoded, "round trip failed for {}", dictionary);
            assert_eq!(dictionary, detected);
        }
    }

    #[test]
    fn test_invalid_phrase_is_rejected() {
        assert!(mnemonic_to_seed("definitely not a mnemonic").is_err());
    }

    #[test]
    fn test_dictionary_names() {
        assert_eq!("english".parse::<Dictionary>().unwrap(), Dictionary::English);
        assert_eq!("".parse::<Dictionary>().unwrap(), Dictionary::English);
        assert!("klingon".parse::<Dictionary>().is_err());
    }
}
