//! Deterministic deploy construction and signing.
//!
//! A deploy is hashed over a canonical byte encoding of its header and body.
//! The header timestamp is informational and deliberately left out of the
//! hash, so the same logical request (account, entry point, arguments,
//! nonce) always produces the same deploy hash. The ledger rejects a second
//! deploy with a known hash, which is what makes resubmission safe.
//!
//! The hash is signed with the account key and attached as an approval.
//! Only Ed25519 keys can sign here; secp256k1 material is recognized but
//! refused with `SigningFailure`.

use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use casperflow_types::{Identity, KeyAlgorithm, Motes, Plan, PlanId, SubscriptionRequest};
use chrono::{DateTime, Utc};
use ed25519_dalek::pkcs8::DecodePrivateKey;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Serialize, Serializer};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fmt;

pub const ENTRY_SUBSCRIBE: &str = "subscribe";
pub const ENTRY_CREATE_PLAN: &str = "create_plan";
pub const ENTRY_RENEW: &str = "renew_subscription";
pub const ENTRY_DEACTIVATE_PLAN: &str = "deactivate_plan";

const ED25519_SIGNATURE_LEN: usize = 64;

// ── Arguments ────────────────────────────────────────────────────

/// A typed runtime argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    U64(u64),
    U512(Motes),
    String(String),
    PublicKey(Identity),
}

impl ArgValue {
    /// Ledger type name.
    #[must_use]
    pub const fn cl_type(&self) -> &'static str {
        match self {
            Self::U64(_) => "U64",
            Self::U512(_) => "U512",
            Self::String(_) => "String",
            Self::PublicKey(_) => "PublicKey",
        }
    }

    /// Little-endian value encoding; U512 is length-prefixed and trimmed.
    fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::U64(v) => v.to_le_bytes().to_vec(),
            Self::U512(m) => {
                let le = m.as_u64().to_le_bytes();
                let len = le.len() - le.iter().rev().take_while(|b| **b == 0).count();
                let mut out = Vec::with_capacity(1 + len);
                out.push(len as u8);
                out.extend_from_slice(&le[..len]);
                out
            }
            Self::String(s) => {
                let mut out = (s.len() as u32).to_le_bytes().to_vec();
                out.extend_from_slice(s.as_bytes());
                out
            }
            Self::PublicKey(id) => id.to_tagged_bytes(),
        }
    }

    fn parsed(&self) -> serde_json::Value {
        match self {
            Self::U64(v) => json!(v),
            Self::U512(m) => json!(m.to_string()),
            Self::String(s) => json!(s),
            Self::PublicKey(id) => json!(id.to_hex()),
        }
    }
}

impl Serialize for ArgValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct ClValue<'a> {
            cl_type: &'a str,
            bytes: String,
            parsed: serde_json::Value,
        }

        ClValue {
            cl_type: self.cl_type(),
            bytes: hex::encode(self.to_bytes()),
            parsed: self.parsed(),
        }
        .serialize(serializer)
    }
}

/// `(name, value)`; serialized as a two-element array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedArg(pub String, pub ArgValue);

impl NamedArg {
    pub fn new(name: impl Into<String>, value: ArgValue) -> Self {
        Self(name.into(), value)
    }
}

// ── Executable items ─────────────────────────────────────────────

/// Payment or session code of a deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ExecutableItem {
    /// Raw wasm (empty for the standard payment).
    ModuleBytes {
        #[serde(serialize_with = "as_hex")]
        module_bytes: Vec<u8>,
        args: Vec<NamedArg>,
    },
    /// A call into an installed contract.
    StoredContractByHash {
        #[serde(serialize_with = "as_hex")]
        hash: [u8; 32],
        entry_point: String,
        args: Vec<NamedArg>,
    },
}

impl ExecutableItem {
    /// The standard payment: empty module bytes with an `amount` argument.
    #[must_use]
    pub fn standard_payment(amount: Motes) -> Self {
        Self::ModuleBytes {
            module_bytes: Vec::new(),
            args: vec![NamedArg::new("amount", ArgValue::U512(amount))],
        }
    }

    /// Entry point name, or `None` for module bytes.
    #[must_use]
    pub fn entry_point(&self) -> Option<&str> {
        match self {
            Self::ModuleBytes { .. } => None,
            Self::StoredContractByHash { entry_point, .. } => Some(entry_point),
        }
    }

    #[must_use]
    pub fn args(&self) -> &[NamedArg] {
        match self {
            Self::ModuleBytes { args, .. } | Self::StoredContractByHash { args, .. } => args,
        }
    }

    fn encode(&self, enc: &mut Encoder) {
        match self {
            Self::ModuleBytes { module_bytes, args } => {
                enc.u8(0);
                enc.bytes(module_bytes);
                enc.args(args);
            }
            Self::StoredContractByHash {
                hash,
                entry_point,
                args,
            } => {
                enc.u8(1);
                enc.raw(hash);
                enc.str(entry_point);
                enc.args(args);
            }
        }
    }
}

fn as_hex<S: Serializer, T: AsRef<[u8]>>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

// ── Deploy ───────────────────────────────────────────────────────

/// Deploy header, in the ledger's JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployHeader {
    pub account: Identity,
    pub timestamp: DateTime<Utc>,
    pub ttl: String,
    pub gas_price: u64,
    pub body_hash: String,
    pub dependencies: Vec<String>,
    pub chain_name: String,
    #[serde(skip)]
    ttl_ms: u64,
}

/// A signer's approval of a deploy hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Approval {
    pub signer: Identity,
    pub signature: String,
}

/// A deploy as sent in `account_put_deploy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deploy {
    pub hash: String,
    pub header: DeployHeader,
    pub payment: ExecutableItem,
    pub session: ExecutableItem,
    pub approvals: Vec<Approval>,
}

impl Deploy {
    /// Recomputes the deploy hash from contents, checking the body hash too.
    pub fn recompute_hash(&self) -> LedgerResult<[u8; 32]> {
        let body_hash = body_hash(&self.payment, &self.session);
        if hex::encode(body_hash) != self.header.body_hash {
            return Err(LedgerError::InvalidDeploy("body hash mismatch".to_string()));
        }
        Ok(header_hash(&self.header, &body_hash))
    }
}

fn body_hash(payment: &ExecutableItem, session: &ExecutableItem) -> [u8; 32] {
    let mut enc = Encoder::default();
    payment.encode(&mut enc);
    session.encode(&mut enc);
    enc.digest()
}

fn header_hash(header: &DeployHeader, body_hash: &[u8; 32]) -> [u8; 32] {
    let mut enc = Encoder::default();
    enc.bytes(&header.account.to_tagged_bytes());
    enc.u64(header.ttl_ms);
    enc.u64(header.gas_price);
    enc.raw(body_hash);
    enc.u32(header.dependencies.len() as u32);
    for dep in &header.dependencies {
        enc.str(dep);
    }
    enc.str(&header.chain_name);
    enc.digest()
}

fn format_ttl(ttl_ms: u64) -> String {
    if ttl_ms % 60_000 == 0 {
        format!("{}m", ttl_ms / 60_000)
    } else {
        format!("{ttl_ms}ms")
    }
}

#[derive(Default)]
struct Encoder(Vec<u8>);

impl Encoder {
    fn u8(&mut self, v: u8) {
        self.0.push(v);
    }

    fn u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn raw(&mut self, bytes: &[u8]) {
        self.0.extend_from_slice(bytes);
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.u32(bytes.len() as u32);
        self.raw(bytes);
    }

    fn str(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }

    fn args(&mut self, args: &[NamedArg]) {
        self.u32(args.len() as u32);
        for NamedArg(name, value) in args {
            self.str(name);
            self.bytes(&value.to_bytes());
            self.str(value.cl_type());
        }
    }

    fn digest(self) -> [u8; 32] {
        Sha256::digest(&self.0).into()
    }
}

// ── Signer keys ──────────────────────────────────────────────────

/// Private key material of the deploy's account.
pub enum SignerKeys {
    Ed25519(SigningKey),
    /// Recognized key material this client cannot sign with.
    Unsupported { algorithm: KeyAlgorithm },
}

impl SignerKeys {
    /// Ed25519 key from a 32-byte secret seed.
    #[must_use]
    pub fn ed25519_from_seed(seed: [u8; 32]) -> Self {
        Self::Ed25519(SigningKey::from_bytes(&seed))
    }

    /// Loads a key from a PKCS#8 PEM file's contents.
    ///
    /// # Errors
    ///
    /// `SigningFailure` if the PEM is not a recognizable private key.
    pub fn from_pem(pem: &str) -> LedgerResult<Self> {
        if let Ok(key) = SigningKey::from_pkcs8_pem(pem) {
            return Ok(Self::Ed25519(key));
        }
        if pem.contains("BEGIN EC PRIVATE KEY") {
            return Ok(Self::Unsupported {
                algorithm: KeyAlgorithm::Secp256k1,
            });
        }
        Err(LedgerError::SigningFailure(
            "unrecognized private key PEM".to_string(),
        ))
    }

    /// The account identity these keys sign for.
    pub fn identity(&self) -> LedgerResult<Identity> {
        match self {
            Self::Ed25519(key) => Ok(Identity::from_ed25519(key.verifying_key().to_bytes())),
            Self::Unsupported { algorithm } => Err(unsupported(*algorithm)),
        }
    }

    /// Signs a deploy hash, returning the tagged signature bytes.
    pub fn sign(&self, hash: &[u8; 32]) -> LedgerResult<Vec<u8>> {
        match self {
            Self::Ed25519(key) => {
                let signature = key.sign(hash);
                let mut out = Vec::with_capacity(1 + ED25519_SIGNATURE_LEN);
                out.push(KeyAlgorithm::Ed25519.tag());
                out.extend_from_slice(&signature.to_bytes());
                Ok(out)
            }
            Self::Unsupported { algorithm } => Err(unsupported(*algorithm)),
        }
    }
}

fn unsupported(algorithm: KeyAlgorithm) -> LedgerError {
    LedgerError::SigningFailure(format!("unsupported curve {algorithm}"))
}

impl fmt::Debug for SignerKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ed25519(key) => f
                .debug_struct("SignerKeys::Ed25519")
                .field("public", &hex::encode(key.verifying_key().to_bytes()))
                .field("secret", &"[REDACTED]")
                .finish(),
            Self::Unsupported { algorithm } => f
                .debug_struct("SignerKeys::Unsupported")
                .field("algorithm", algorithm)
                .finish(),
        }
    }
}

// ── Unsigned / signed deploys ────────────────────────────────────

/// What to put on chain, before hashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployIntent {
    pub account: Identity,
    pub session: ExecutableItem,
    pub payment: Motes,
    pub requested_at: DateTime<Utc>,
}

/// A hashed deploy awaiting a signature (ours, or a wallet's).
#[derive(Debug, Clone)]
pub struct UnsignedDeploy {
    deploy: Deploy,
    payload_hash: [u8; 32],
}

impl UnsignedDeploy {
    #[must_use]
    pub fn deploy(&self) -> &Deploy {
        &self.deploy
    }

    #[must_use]
    pub fn payload_hash(&self) -> &[u8; 32] {
        &self.payload_hash
    }

    /// Hex deploy hash, which doubles as the transaction id.
    #[must_use]
    pub fn transaction_id(&self) -> String {
        hex::encode(self.payload_hash)
    }

    /// Signs with local keys and checks the result verifies.
    ///
    /// # Errors
    ///
    /// `SigningFailure` if the keys cannot sign or the signature does not
    /// verify against the deploy hash.
    pub fn sign(self, signer: &SignerKeys) -> LedgerResult<SignedTransaction> {
        let identity = signer.identity()?;
        if identity != self.deploy.header.account {
            return Err(LedgerError::SigningFailure(
                "signer does not match deploy account".to_string(),
            ));
        }
        let signature = signer.sign(&self.payload_hash)?;
        let tx = self.attach_signature(identity, signature);
        tx.verify()
            .map_err(|e| LedgerError::SigningFailure(e.to_string()))?;
        Ok(tx)
    }

    /// Attaches an externally produced signature (e.g. from a wallet).
    /// The result is not verified here; submission verifies it.
    #[must_use]
    pub fn attach_signature(mut self, signer: Identity, signature: Vec<u8>) -> SignedTransaction {
        self.deploy.approvals.push(Approval {
            signer: signer.clone(),
            signature: hex::encode(&signature),
        });
        SignedTransaction {
            deploy: self.deploy,
            payload_hash: self.payload_hash,
            signature,
            signer,
        }
    }
}

/// A deploy with one approval, ready to submit.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    deploy: Deploy,
    payload_hash: [u8; 32],
    signature: Vec<u8>,
    signer: Identity,
}

impl SignedTransaction {
    #[must_use]
    pub fn deploy(&self) -> &Deploy {
        &self.deploy
    }

    #[must_use]
    pub fn payload_hash(&self) -> &[u8; 32] {
        &self.payload_hash
    }

    /// Tagged signature bytes.
    #[must_use]
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    #[must_use]
    pub fn signer(&self) -> &Identity {
        &self.signer
    }

    /// Hex deploy hash.
    #[must_use]
    pub fn transaction_id(&self) -> String {
        hex::encode(self.payload_hash)
    }

    /// Checks the hash matches the contents and the signature verifies
    /// against the hash and signer key.
    pub fn verify(&self) -> LedgerResult<()> {
        let recomputed = self.deploy.recompute_hash()?;
        if recomputed != self.payload_hash || self.deploy.hash != hex::encode(recomputed) {
            return Err(LedgerError::InvalidDeploy("deploy hash mismatch".to_string()));
        }

        if self.signer.algorithm() != KeyAlgorithm::Ed25519 {
            return Err(LedgerError::InvalidSignature(format!(
                "cannot verify {} signatures",
                self.signer.algorithm()
            )));
        }
        let (&tag, raw) = self
            .signature
            .split_first()
            .ok_or_else(|| LedgerError::InvalidSignature("empty signature".to_string()))?;
        if tag != KeyAlgorithm::Ed25519.tag() {
            return Err(LedgerError::InvalidSignature(format!("signature tag {tag:#04x}")));
        }
        let signature = Signature::from_slice(raw)
            .map_err(|_| LedgerError::InvalidSignature("invalid signature length".to_string()))?;
        let key_bytes: [u8; 32] = self
            .signer
            .key_bytes()
            .try_into()
            .map_err(|_| LedgerError::InvalidSignature("invalid public key".to_string()))?;
        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|_| LedgerError::InvalidSignature("invalid public key".to_string()))?;

        verifying_key
            .verify_strict(&self.payload_hash, &signature)
            .map_err(|_| LedgerError::InvalidSignature("signature does not verify".to_string()))
    }
}

// ── Builder ──────────────────────────────────────────────────────

/// Builds deploys for the subscription contract.
#[derive(Debug, Clone)]
pub struct DeployBuilder {
    chain_name: String,
    contract_hash: [u8; 32],
    gas_price: u64,
    ttl_ms: u64,
    call_payment: Motes,
    module_payment: Motes,
}

impl DeployBuilder {
    pub fn from_config(config: &LedgerConfig) -> LedgerResult<Self> {
        Ok(Self {
            chain_name: config.chain_name.clone(),
            contract_hash: config.contract_hash_bytes()?,
            gas_price: config.gas_price,
            ttl_ms: config.ttl_ms,
            call_payment: config.call_payment,
            module_payment: config.module_payment,
        })
    }

    #[must_use]
    pub fn chain_name(&self) -> &str {
        &self.chain_name
    }

    fn call(
        &self,
        account: &Identity,
        entry_point: &str,
        mut args: Vec<NamedArg>,
        nonce: u64,
        requested_at: DateTime<Utc>,
    ) -> DeployIntent {
        args.push(NamedArg::new("nonce", ArgValue::U64(nonce)));
        DeployIntent {
            account: account.clone(),
            session: ExecutableItem::StoredContractByHash {
                hash: self.contract_hash,
                entry_point: entry_point.to_string(),
                args,
            },
            payment: self.call_payment,
            requested_at,
        }
    }

    /// `subscribe(plan_id, nonce)` on behalf of the subscriber.
    #[must_use]
    pub fn subscribe_intent(&self, request: &SubscriptionRequest) -> DeployIntent {
        self.call(
            &request.subscriber,
            ENTRY_SUBSCRIBE,
            vec![NamedArg::new(
                "plan_id",
                ArgValue::String(request.plan_id.to_string()),
            )],
            request.nonce,
            request.requested_at,
        )
    }

    /// `create_plan(...)` on behalf of the plan's merchant.
    #[must_use]
    pub fn create_plan_intent(
        &self,
        plan: &Plan,
        nonce: u64,
        requested_at: DateTime<Utc>,
    ) -> DeployIntent {
        self.call(
            &plan.merchant,
            ENTRY_CREATE_PLAN,
            vec![
                NamedArg::new("plan_id", ArgValue::String(plan.id.to_string())),
                NamedArg::new("name", ArgValue::String(plan.name.clone())),
                NamedArg::new("base_price", ArgValue::U512(plan.base_price)),
                NamedArg::new("usage_price", ArgValue::U512(plan.usage_price)),
                NamedArg::new("billing_cycle", ArgValue::U64(plan.billing_period_secs)),
                NamedArg::new("trial_days", ArgValue::U64(u64::from(plan.trial_days))),
            ],
            nonce,
            requested_at,
        )
    }

    /// `renew_subscription(plan_id, nonce)` on behalf of the subscriber.
    #[must_use]
    pub fn renew_intent(
        &self,
        subscriber: &Identity,
        plan_id: &PlanId,
        nonce: u64,
        requested_at: DateTime<Utc>,
    ) -> DeployIntent {
        self.call(
            subscriber,
            ENTRY_RENEW,
            vec![NamedArg::new("plan_id", ArgValue::String(plan_id.to_string()))],
            nonce,
            requested_at,
        )
    }

    /// `deactivate_plan(plan_id, nonce)` on behalf of the merchant.
    #[must_use]
    pub fn deactivate_plan_intent(
        &self,
        merchant: &Identity,
        plan_id: &PlanId,
        nonce: u64,
        requested_at: DateTime<Utc>,
    ) -> DeployIntent {
        self.call(
            merchant,
            ENTRY_DEACTIVATE_PLAN,
            vec![NamedArg::new("plan_id", ArgValue::String(plan_id.to_string()))],
            nonce,
            requested_at,
        )
    }

    /// Installs contract wasm from the given account.
    #[must_use]
    pub fn module_intent(
        &self,
        account: &Identity,
        wasm: Vec<u8>,
        requested_at: DateTime<Utc>,
    ) -> DeployIntent {
        DeployIntent {
            account: account.clone(),
            session: ExecutableItem::ModuleBytes {
                module_bytes: wasm,
                args: Vec::new(),
            },
            payment: self.module_payment,
            requested_at,
        }
    }

    /// Hashes an intent into an unsigned deploy.
    #[must_use]
    pub fn prepare(&self, intent: DeployIntent) -> UnsignedDeploy {
        let payment = ExecutableItem::standard_payment(intent.payment);
        let body_hash = body_hash(&payment, &intent.session);
        let header = DeployHeader {
            account: intent.account,
            timestamp: intent.requested_at,
            ttl: format_ttl(self.ttl_ms),
            gas_price: self.gas_price,
            body_hash: hex::encode(body_hash),
            dependencies: Vec::new(),
            chain_name: self.chain_name.clone(),
            ttl_ms: self.ttl_ms,
        };
        let payload_hash = header_hash(&header, &body_hash);

        UnsignedDeploy {
            deploy: Deploy {
                hash: hex::encode(payload_hash),
                header,
                payment,
                session: intent.session,
                approvals: Vec::new(),
            },
            payload_hash,
        }
    }

    /// Builds and signs any intent.
    pub fn build_intent(
        &self,
        intent: DeployIntent,
        signer: &SignerKeys,
    ) -> LedgerResult<SignedTransaction> {
        // Surface unsupported curves before doing any work.
        signer.identity()?;
        self.prepare(intent).sign(signer)
    }

    /// Builds and signs a subscription deploy.
    ///
    /// # Errors
    ///
    /// `SigningFailure` if the keys use an unsupported curve, do not belong
    /// to the subscriber, or produce a signature that fails to verify.
    pub fn build(
        &self,
        request: &SubscriptionRequest,
        signer: &SignerKeys,
    ) -> LedgerResult<SignedTransaction> {
        self.build_intent(self.subscribe_intent(request), signer)
    }
}
