//! Test fixtures: signed image construction, signing keys and fully
//! provisioned fake devices.
use super::{
    bootloader::{BootConfig, Bootloader, CrcPolicy},
    image::{ImageFlags, ImageHeader, HEADER_SIZE},
    keys::tests::{provision_public_key, provision_symmetric_key},
    otp_map::{SECURE_DEVICE_ENABLED, SYMMETRIC_KEY_COUNT},
    security_ext::{padded_length, EXTENSION_ALIGNMENT},
    version::{FwVersion, VersionLedger},
};
use crate::{
    drivers::software_crypto::SoftwareCrypto,
    hal::{
        crypto::{CryptoEngine, Curve, EccEngine, EcdsaOperands, EdwardsPoint, EngineError, HashEngine, HashMethod, Operand},
        doubles::{
            flash::{FakeNvms, FakePartition},
            otp::FakeOtp,
            rng::FakeEntropy,
            system::FakeSystem,
        },
    },
    ports::da1468x::{BOOT_CONFIG, OTP_MAP},
    utilities::crc16,
};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use zerocopy::AsBytes;

pub const TEST_EXEC: &[u8] = b"\x00\x80\x00\x20\x01\x02\x02\x08executable image used by signature tests";

pub const EXEC_BASE: u32 = 0x0802_0000;
pub const UPDATE_BASE: u32 = 0x0806_0000;
pub const HEADER_BASE: u32 = 0x0801_F000;
pub const IMAGE_PARTITION_SIZE: usize = 0x1_0000;
pub const HEADER_PARTITION_SIZE: usize = 0x1000;
pub const OTP_SIZE: usize = 0x1_0000;

const DEFAULT_CODE_SIZE: usize = 2048;

pub type TestBootloader = Bootloader<FakePartition, FakeOtp, SoftwareCrypto, FakeEntropy, FakeSystem>;

/// Encodes one `{tag, length, value}` record.
pub fn record(tag: u16, value: &[u8]) -> Vec<u8> {
    let mut bytes = tag.to_le_bytes().to_vec();
    bytes.extend((value.len() as u16).to_le_bytes());
    bytes.extend(value);
    bytes
}

/// Field by field description of a security extension.
#[derive(Clone, Debug)]
pub struct ExtensionSpec {
    pub public_key_id: u32,
    /// Raw `(mode, curve, hash)` bytes.
    pub algorithm: (u8, u8, u8),
    pub signature: Vec<u8>,
    pub fw_version: Option<FwVersion>,
    pub min_version: Option<FwVersion>,
    /// `(key type, id)` pairs.
    pub revocations: Vec<(u8, u32)>,
    /// Replaces the encoded `revocations` when set.
    pub raw_revocation: Option<Vec<u8>>,
    /// Appended to the device administration section as is.
    pub extra_records: Vec<Vec<u8>>,
}

impl ExtensionSpec {
    pub fn ed25519(public_key_id: u32, fw_version: FwVersion) -> Self {
        Self {
            public_key_id,
            algorithm: (2, 4, 4),
            signature: vec![0x55; 64],
            fw_version: Some(fw_version),
            min_version: None,
            revocations: Vec::new(),
            raw_revocation: None,
            extra_records: Vec::new(),
        }
    }

    pub fn ecdsa_p256(public_key_id: u32, fw_version: FwVersion) -> Self {
        Self { algorithm: (1, 3, 2), ..Self::ed25519(public_key_id, fw_version) }
    }

    pub fn ecdsa_p224(public_key_id: u32, fw_version: FwVersion) -> Self {
        Self { algorithm: (1, 2, 1), ..Self::ed25519(public_key_id, fw_version) }
    }

    pub fn hash(&self) -> HashMethod {
        match self.algorithm.2 {
            1 => HashMethod::Sha224,
            2 => HashMethod::Sha256,
            3 => HashMethod::Sha384,
            _ => HashMethod::Sha512,
        }
    }

    pub fn security_section(&self) -> Vec<u8> {
        let (mode, curve, hash) = self.algorithm;
        let mut value = self.public_key_id.to_le_bytes().to_vec();
        value.extend([mode, curve, hash]);
        value.extend(record(0x33AA, &self.signature));
        record(0x22AA, &value)
    }

    pub fn administration_section(&self) -> Vec<u8> {
        let mut value = Vec::new();
        if let Some(version) = self.fw_version {
            value.extend(record(0x66AA, &version.to_le_bytes()));
        }
        match &self.raw_revocation {
            Some(raw) => value.extend(record(0x55AA, raw)),
            None if !self.revocations.is_empty() => {
                let entries: Vec<u8> = self
                    .revocations
                    .iter()
                    .flat_map(|(kind, id)| core::iter::once(*kind).chain(id.to_le_bytes()))
                    .collect();
                value.extend(record(0x55AA, &entries));
            }
            None => {}
        }
        if let Some(version) = self.min_version {
            value.extend(record(0x77AA, &version.to_le_bytes()));
        }
        self.extra_records.iter().for_each(|extra| value.extend(extra));
        record(0x44AA, &value)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = self.security_section();
        bytes.extend(self.administration_section());
        bytes
    }

    /// Encoded extension with its `0xFF` padding.
    pub fn encode_padded(&self) -> Vec<u8> {
        let mut bytes = self.encode();
        bytes.resize(padded_length(bytes.len()), 0xFF);
        bytes
    }
}

/// Image signing keys, derived deterministically from a one byte seed.
pub enum SigningKey {
    Ed25519(ed25519_dalek::SigningKey),
    P256(p256::ecdsa::SigningKey),
    P224(p224::ecdsa::SigningKey),
}

impl SigningKey {
    pub fn ed25519(seed: u8) -> Self {
        SigningKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&[seed; 32]))
    }

    pub fn p256(seed: u8) -> Self {
        SigningKey::P256(p256::ecdsa::SigningKey::from_slice(&[seed; 32]).unwrap())
    }

    pub fn p224(seed: u8) -> Self {
        SigningKey::P224(p224::ecdsa::SigningKey::from_slice(&[seed; 28]).unwrap())
    }

    /// Key as provisioned in OTP: compressed point for Ed25519, raw
    /// `x || y` for ECDSA.
    pub fn public_key(&self) -> Vec<u8> {
        match self {
            SigningKey::Ed25519(key) => key.verifying_key().to_bytes().to_vec(),
            SigningKey::P256(key) => key.verifying_key().to_encoded_point(false).as_bytes()[1..].to_vec(),
            SigningKey::P224(key) => key.verifying_key().to_encoded_point(false).as_bytes()[1..].to_vec(),
        }
    }

    /// Signs `device_administration || exec` the way the loader verifies it.
    pub fn sign(&self, hash: HashMethod, device_administration: &[u8], exec: &[u8]) -> Vec<u8> {
        let message = [device_administration, exec].concat();
        match self {
            SigningKey::Ed25519(key) => {
                use ed25519_dalek::Signer;
                key.sign(&message).to_bytes().to_vec()
            }
            SigningKey::P256(key) => {
                use p256::ecdsa::{signature::hazmat::PrehashSigner, Signature};
                let signature: Signature = key.sign_prehash(&prehash(hash, &message, 32)).unwrap();
                signature.to_bytes().to_vec()
            }
            SigningKey::P224(key) => {
                use p224::ecdsa::{signature::hazmat::PrehashSigner, Signature};
                let signature: Signature = key.sign_prehash(&prehash(hash, &message, 28)).unwrap();
                signature.to_bytes().to_vec()
            }
        }
    }
}

/// Digest of `message` cut to the curve width, the way the loader feeds
/// it to the ECC engine.
pub fn prehash(hash: HashMethod, message: &[u8], curve_width: usize) -> Vec<u8> {
    use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
    let mut digest = match hash {
        HashMethod::Sha224 => Sha224::digest(message).to_vec(),
        HashMethod::Sha256 => Sha256::digest(message).to_vec(),
        HashMethod::Sha384 => Sha384::digest(message).to_vec(),
        HashMethod::Sha512 => Sha512::digest(message).to_vec(),
    };
    digest.truncate(curve_width);
    digest
}

/// A complete firmware image: header fields, optional security
/// extension and code.
pub struct ImageBuilder {
    pub version: String,
    pub flags: ImageFlags,
    pub timestamp: u32,
    pub code: Vec<u8>,
    pub extension: Option<ExtensionSpec>,
    /// Signs the extension when present; otherwise its placeholder
    /// signature is kept.
    pub key: Option<SigningKey>,
}

impl ImageBuilder {
    /// Image without a security extension, as built for insecure devices.
    pub fn plain(version: &str) -> Self {
        Self {
            version: version.into(),
            flags: ImageFlags(ImageFlags::VALID),
            timestamp: 0x6000_0000,
            code: Self::firmware(EXEC_BASE, DEFAULT_CODE_SIZE, 0xC3),
            extension: None,
            key: None,
        }
    }

    /// Image signed by `key`, which the extension refers to as root key
    /// `key_id`.
    pub fn signed(key: SigningKey, key_id: u32, version: &str, fw_version: FwVersion) -> Self {
        let extension = match key {
            SigningKey::Ed25519(_) => ExtensionSpec::ed25519(key_id, fw_version),
            SigningKey::P256(_) => ExtensionSpec::ecdsa_p256(key_id, fw_version),
            SigningKey::P224(_) => ExtensionSpec::ecdsa_p224(key_id, fw_version),
        };
        Self { extension: Some(extension), key: Some(key), ..Self::plain(version) }
    }

    /// Code whose vector table has a sane reset vector for an image
    /// mapped at `image_address`.
    pub fn firmware(image_address: u32, size: usize, fill: u8) -> Vec<u8> {
        let mut code: Vec<u8> = (0..size).map(|index| fill ^ index as u8).collect();
        code[0..4].copy_from_slice(&0x2000_8000u32.to_le_bytes());
        code[4..8].copy_from_slice(&(image_address + 0x201).to_le_bytes());
        code
    }

    pub fn header(&self, exec_location: u32) -> ImageHeader {
        ImageHeader::describing(&self.code, &self.version, self.timestamp, exec_location)
            .with_flags(self.flags)
    }

    /// Padded extension with the signature filled in, or nothing.
    pub fn extension_bytes(&self) -> Vec<u8> {
        let Some(spec) = &self.extension else {
            return Vec::new();
        };
        let mut spec = spec.clone();
        if let Some(key) = &self.key {
            let padded = spec.encode_padded();
            let device_administration = &padded[spec.security_section().len()..];
            spec.signature = key.sign(spec.hash(), device_administration, &self.code);
        }
        spec.encode_padded()
    }
}

/// Update partition layout: header, extension and padding, then code.
pub fn staged(image: &ImageBuilder) -> Vec<u8> {
    let extension = image.extension_bytes();
    let exec_location =
        if extension.is_empty() { EXTENSION_ALIGNMENT } else { HEADER_SIZE + extension.len() };
    let mut bytes = image.header(exec_location as u32).as_bytes().to_vec();
    bytes.extend(extension);
    bytes.resize(exec_location, 0xFF);
    bytes.extend(&image.code);
    bytes
}

/// Installed layout: header partition contents and exec partition contents.
pub fn installed(image: &ImageBuilder) -> (Vec<u8>, Vec<u8>) {
    let mut header = image.header(0).as_bytes().to_vec();
    header.extend(image.extension_bytes());
    (header, image.code.clone())
}

/// Stand-in for the bootloader binary at the start of OTP.
pub fn bootloader_image() -> Vec<u8> {
    (0..1000u32).map(|index| (index.wrapping_mul(7) ^ 0x3C) as u8).collect()
}

/// Burns the bootloader image, its length in words and its CRC16.
pub fn provision_bootloader(otp: &mut FakeOtp) {
    let image = bootloader_image();
    otp.burn(OTP_MAP.base, &image);
    otp.burn(OTP_MAP.bootloader_length, &((image.len() / 4) as u32).to_le_bytes());
    otp.burn(OTP_MAP.bootloader_crc, &u32::from(crc16::checksum(&image)).to_le_bytes());
}

/// Factory provisioning of the OTP.
pub struct Provisioning {
    pub bootloader: bool,
    pub secure: bool,
    pub root_keys: Vec<(usize, Vec<u8>)>,
    pub symmetric_keys: Vec<(usize, u8)>,
    pub ledger: Vec<FwVersion>,
}

impl Provisioning {
    /// Valid bootloader, nothing else.
    pub fn insecure() -> Self {
        Self {
            bootloader: true,
            secure: false,
            root_keys: Vec::new(),
            symmetric_keys: Vec::new(),
            ledger: Vec::new(),
        }
    }

    /// Secure device with `SigningKey::ed25519(1)` as root key 0,
    /// `SigningKey::p256(7)` as root key 1, every symmetric key and a
    /// `1.0` rollback floor.
    pub fn secure() -> Self {
        Self {
            secure: true,
            root_keys: vec![(0, SigningKey::ed25519(1).public_key()), (1, SigningKey::p256(7).public_key())],
            symmetric_keys: (0..SYMMETRIC_KEY_COUNT).map(|slot| (slot, 0x10 + slot as u8)).collect(),
            ledger: vec![FwVersion::new(1, 0)],
            ..Self::insecure()
        }
    }

    pub fn without_ledger(self) -> Self { Self { ledger: Vec::new(), ..self } }

    pub fn without_symmetric_keys(self) -> Self { Self { symmetric_keys: Vec::new(), ..self } }

    pub fn with_ledger(self, ledger: &[FwVersion]) -> Self { Self { ledger: ledger.to_vec(), ..self } }

    pub fn burn(&self) -> FakeOtp {
        let mut otp = FakeOtp::new(OTP_MAP.base, OTP_SIZE);
        if self.bootloader {
            provision_bootloader(&mut otp);
        }
        if self.secure {
            otp.burn(OTP_MAP.secure_device, &[SECURE_DEVICE_ENABLED]);
        }
        for (slot, key) in &self.root_keys {
            provision_public_key(&mut otp, *slot, key);
        }
        for (slot, fill) in &self.symmetric_keys {
            provision_symmetric_key(&mut otp, *slot, *fill);
        }
        let ledger = VersionLedger::new(OTP_MAP);
        for version in &self.ledger {
            ledger.append(&mut otp, *version).unwrap();
        }
        otp
    }
}

/// OTP plus the three image partitions, ready to be handed to a loader.
pub struct Device {
    pub otp: FakeOtp,
    pub update: Option<FakePartition>,
    pub exec: Option<FakePartition>,
    pub header: Option<FakePartition>,
    pub config: BootConfig,
}

impl Device {
    /// Device with blank partitions.
    pub fn new(otp: FakeOtp) -> Self {
        Self {
            otp,
            update: Some(FakePartition::new(UPDATE_BASE, IMAGE_PARTITION_SIZE)),
            exec: Some(FakePartition::new(EXEC_BASE, IMAGE_PARTITION_SIZE)),
            header: Some(FakePartition::new(HEADER_BASE, HEADER_PARTITION_SIZE)),
            config: BOOT_CONFIG,
        }
    }

    pub fn with_installed(mut self, image: &ImageBuilder) -> Self {
        let (header, code) = installed(image);
        self.header = Some(FakePartition::with_contents(HEADER_BASE, HEADER_PARTITION_SIZE, &header));
        self.exec = Some(FakePartition::with_contents(EXEC_BASE, IMAGE_PARTITION_SIZE, &code));
        self
    }

    pub fn with_staged(mut self, image: &ImageBuilder) -> Self {
        self.update = Some(FakePartition::with_contents(UPDATE_BASE, IMAGE_PARTITION_SIZE, &staged(image)));
        self
    }

    pub fn with_crc_policy(mut self, crc_policy: CrcPolicy) -> Self {
        self.config.crc_policy = crc_policy;
        self
    }

    pub fn bootloader(self) -> TestBootloader { self.bootloader_with(SoftwareCrypto::new()) }

    pub fn bootloader_with<E: CryptoEngine>(
        self,
        engine: E,
    ) -> Bootloader<FakePartition, FakeOtp, E, FakeEntropy, FakeSystem> {
        let mut nvms = FakeNvms { update: self.update, exec: self.exec, header: self.header };
        Bootloader::new(
            &mut nvms,
            self.otp,
            engine,
            FakeEntropy::new(0x00C0_FFEE),
            FakeSystem::default(),
            OTP_MAP,
            self.config,
        )
    }
}

/// Software engine that counts how many digests were started.
#[derive(Default)]
pub struct CountingCrypto {
    pub inner: SoftwareCrypto,
    pub digests: usize,
}

impl HashEngine for CountingCrypto {
    fn hash_configure(&mut self, method: HashMethod, output_size: usize) -> Result<(), EngineError> {
        self.digests += 1;
        self.inner.hash_configure(method, output_size)
    }

    fn hash_input(&mut self, block: &[u8], last: bool) -> Result<(), EngineError> {
        self.inner.hash_input(block, last)
    }

    fn hash_output(&mut self, output: &mut [u8]) -> Result<(), EngineError> { self.inner.hash_output(output) }
}

impl EccEngine for CountingCrypto {
    fn ecdsa_verify(&mut self, curve: Curve, operands: &EcdsaOperands) -> Result<(), EngineError> {
        self.inner.ecdsa_verify(curve, operands)
    }

    fn ed25519_recover_x(&mut self, y: &Operand) -> Result<Operand, EngineError> { self.inner.ed25519_recover_x(y) }

    fn ed25519_negate(&mut self, x: &Operand) -> Result<Operand, EngineError> { self.inner.ed25519_negate(x) }

    fn ed25519_point_on_curve(&mut self, point: &EdwardsPoint) -> Result<(), EngineError> {
        self.inner.ed25519_point_on_curve(point)
    }

    fn ed25519_reduce(&mut self, wide: &[u8; 64]) -> Result<Operand, EngineError> { self.inner.ed25519_reduce(wide) }

    fn ed25519_check_signature(
        &mut self,
        s: &Operand,
        r: &EdwardsPoint,
        a: &EdwardsPoint,
        h: &Operand,
    ) -> Result<(), EngineError> {
        self.inner.ed25519_check_signature(s, r, a, h)
    }
}
