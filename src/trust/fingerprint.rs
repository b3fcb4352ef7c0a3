// 主机公钥与指纹

use std::fmt;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use md5::Md5;
use sha2::{Digest, Sha256};

use super::error::{TrustError, TrustResult};

/// 服务器出示的公钥：算法名 + SSH wire 格式的公钥数据
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HostKey {
    pub algorithm: String,
    pub blob: Vec<u8>,
}

impl HostKey {
    pub fn new(algorithm: impl Into<String>, blob: impl Into<Vec<u8>>) -> Self {
        Self {
            algorithm: algorithm.into(),
            blob: blob.into(),
        }
    }

    /// 从 known_hosts 中的 base64 字段解析
    pub fn from_base64(algorithm: &str, encoded: &str) -> TrustResult<Self> {
        let blob = STANDARD
            .decode(encoded)
            .map_err(|e| TrustError::InvalidKey(format!("{}: {}", algorithm, e)))?;
        if blob.is_empty() {
            return Err(TrustError::InvalidKey(format!("{}: empty key", algorithm)));
        }
        Ok(Self::new(algorithm, blob))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.blob)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.blob)
    }
}

/// 公钥指纹：SHA256（base64 无填充）与 MD5（十六进制冒号分组）两种表示
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fingerprint {
    sha256: String,
    md5: String,
}

impl Fingerprint {
    /// 纯函数：相同的公钥数据总是得到相同的指纹
    pub fn of(blob: &[u8]) -> Self {
        let sha256 = STANDARD_NO_PAD.encode(Sha256::digest(blob));
        let md5 = Md5::digest(blob)
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":");
        Self { sha256, md5 }
    }

    /// `SHA256:...` 形式
    pub fn sha256(&self) -> String {
        format!("SHA256:{}", self.sha256)
    }

    /// `MD5:..` 形式
    pub fn md5(&self) -> String {
        format!("MD5:{}", self.md5)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.sha256(), self.md5())
    }
}
