//! Contract calls and transaction submission over a [`ProviderSession`].

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_dyn_abi::{DecodedEvent, DynSolValue};
use alloy_primitives::{Address, Bytes, B256, U256};
use chain_eth::abi::ContractAbi;
use chain_eth::address::{parse_address, to_lower_hex};
use chain_eth::networks::NetworkId;
use chain_eth::transaction::TransactionRequest;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::gas::{transaction_count, GasEstimator};
use crate::provider::{to_rpc_json, BlockTag, CallRequest, Log, LogFilter, RpcClient, RpcError};
use crate::session::{ProviderSession, ReadClient, WriteBackend, WriteClient};
use crate::types::{SessionEvent, TrxNotice};

/// Gas price for legacy sends that set none: 8 gwei.
pub const DEFAULT_GAS_PRICE: u128 = 8_000_000_000;

/// A contract method invocation.
#[derive(Debug, Clone)]
pub struct ContractCall {
    /// ABI name in the network registry.
    pub contract: String,
    pub address: Address,
    pub method: String,
    pub args: Vec<DynSolValue>,
    pub block: BlockTag,
}

impl ContractCall {
    pub fn new(
        contract: impl Into<String>,
        address: Address,
        method: impl Into<String>,
        args: Vec<DynSolValue>,
    ) -> Self {
        Self {
            contract: contract.into(),
            address,
            method: method.into(),
            args,
            block: BlockTag::Latest,
        }
    }

    pub fn at_block(mut self, block: impl Into<BlockTag>) -> Self {
        self.block = block.into();
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Sender; defaults to the write client's first account.
    pub from: Option<Address>,
    pub value: Option<U256>,
    pub gas_price: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    /// Asset the transaction concerns, reported in the transaction event.
    pub asset: Option<Address>,
    /// Overrides the function name reported in the transaction event.
    pub display_name: Option<String>,
    /// Overrides the arguments reported in the transaction event.
    pub display_args: Option<Vec<String>>,
}

/// Top-level call and send API.
pub struct TransactionFacade {
    session: Arc<ProviderSession>,
    default_gas_price: u128,
}

impl TransactionFacade {
    pub fn new(session: Arc<ProviderSession>) -> Self {
        Self {
            session,
            default_gas_price: DEFAULT_GAS_PRICE,
        }
    }

    /// Uses `price` (if set) for legacy sends without an explicit gas price.
    pub fn with_default_gas_price(mut self, price: Option<u128>) -> Self {
        if let Some(price) = price {
            self.default_gas_price = price;
        }
        self
    }

    pub fn session(&self) -> &Arc<ProviderSession> {
        &self.session
    }

    pub fn default_gas_price(&self) -> u128 {
        self.default_gas_price
    }

    /// Calls `method` on `address` through `client` and decodes its single
    /// return value.
    pub async fn call(
        client: &dyn RpcClient,
        abi: &ContractAbi,
        address: Address,
        method: &str,
        args: &[DynSolValue],
        block: BlockTag,
    ) -> Result<DynSolValue, SessionError> {
        let data = abi.encode_call(method, args)?;
        let request = CallRequest {
            to: Some(address),
            data: Some(data),
            ..Default::default()
        };
        let output = client.call(&request, block).await?;
        Ok(abi.decode_output(method, args.len(), &output)?)
    }

    /// Runs `call` against the read client, waiting for one if necessary.
    pub async fn call_contract(&self, call: &ContractCall) -> Result<DynSolValue, SessionError> {
        let abi = self.session.abi(&call.contract)?;
        let call = call.clone();
        self.session
            .with_read_client(move |client| async move {
                Self::call(client.as_ref(), &abi, call.address, &call.method, &call.args, call.block)
                    .await
            })
            .await
    }

    /// Runs every call against the same read client; fails on the first error.
    pub async fn call_all(&self, calls: &[ContractCall]) -> Result<Vec<DynSolValue>, SessionError> {
        let resolved = calls
            .iter()
            .map(|call| {
                self.session
                    .abi(&call.contract)
                    .map(|abi| (abi, call.clone()))
            })
            .collect::<Result<Vec<_>, SessionError>>()?;

        self.session
            .with_read_client(move |client| async move {
                futures::future::try_join_all(resolved.iter().map(|(abi, call)| {
                    Self::call(client.as_ref(), abi, call.address, &call.method, &call.args, call.block)
                }))
                .await
            })
            .await
    }

    /// Like [`Self::call_contract`], but hands failures to `on_error` instead
    /// of returning them.
    pub async fn call_or_else<F>(&self, call: &ContractCall, on_error: F) -> DynSolValue
    where
        F: FnOnce(SessionError) -> DynSolValue,
    {
        match self.call_contract(call).await {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, contract = %call.contract, method = %call.method, "call failed");
                on_error(e)
            }
        }
    }

    pub async fn get_logs(&self, filter: LogFilter) -> Result<Vec<Log>, SessionError> {
        self.session
            .with_read_client(move |client| async move {
                client.get_past_logs(&filter).await.map_err(SessionError::from)
            })
            .await
    }

    /// Fetches and decodes `event` logs emitted by `address`.
    ///
    /// Logs that fail to decode are skipped.
    pub async fn get_events(
        &self,
        contract: &str,
        address: Address,
        event: &str,
        from_block: Option<u64>,
        to_block: Option<u64>,
    ) -> Result<Vec<DecodedEvent>, SessionError> {
        let abi = self.session.abi(contract)?;
        let signature = abi
            .event(event)
            .ok_or_else(|| {
                SessionError::Configuration(format!("no event {event} in {contract}"))
            })?
            .signature();

        let logs = self
            .get_logs(LogFilter {
                address: Some(address),
                topics: vec![Some(signature)],
                from_block: from_block.into(),
                to_block: to_block.into(),
            })
            .await?;
        Ok(decode_events(&abi, event, &logs))
    }

    pub async fn get_balance(&self, address: Address) -> Result<U256, SessionError> {
        self.session
            .with_read_client(move |client| async move {
                client.get_balance(address).await.map_err(SessionError::from)
            })
            .await
    }

    pub async fn get_block_number(&self) -> Result<u64, SessionError> {
        self.session
            .with_read_client(|client| async move {
                client.get_block_number().await.map_err(SessionError::from)
            })
            .await
    }

    pub async fn get_transaction(&self, hash: B256) -> Result<Option<Value>, SessionError> {
        self.session
            .with_read_client(move |client| async move {
                client.get_transaction(hash).await.map_err(SessionError::from)
            })
            .await
    }

    pub async fn get_transaction_receipt(&self, hash: B256) -> Result<Option<Value>, SessionError> {
        self.session
            .with_read_client(move |client| async move {
                client
                    .get_transaction_receipt(hash)
                    .await
                    .map_err(SessionError::from)
            })
            .await
    }

    pub async fn get_transaction_count(&self, address: Address) -> Result<u64, SessionError> {
        self.session
            .with_read_client(move |client| async move {
                client
                    .get_transaction_count(address)
                    .await
                    .map_err(SessionError::from)
            })
            .await
    }

    pub async fn accounts(&self) -> Result<Vec<String>, SessionError> {
        self.session.accounts().await
    }

    pub async fn network_id(&self) -> Result<Option<NetworkId>, SessionError> {
        self.session.wallet_network_id().await
    }

    /// Signs `message` with `account` (default: the first account).
    pub async fn sign_message(
        &self,
        message: &[u8],
        account: Option<&str>,
    ) -> Result<String, SessionError> {
        let account = match account {
            Some(account) => account.to_string(),
            None => self.first_account().await?,
        };
        let message = message.to_vec();
        self.session
            .with_write_client(
                move |client| async move { client.personal_sign(&message, &account).await },
                || Err(SessionError::NoWriteClient),
            )
            .await
    }

    /// Sends a call to `method` on `address` as a transaction.
    ///
    /// Returns `Ok(None)` when the user cancelled in the wallet.
    pub async fn send(
        &self,
        contract: &str,
        address: Address,
        method: &str,
        args: &[DynSolValue],
        options: SendOptions,
    ) -> Result<Option<B256>, SessionError> {
        let abi = self.session.abi(contract)?;
        let data = abi.encode_call(method, args)?;
        let shown_args = args.iter().map(display_value).collect();
        self.submit(address, data, method, shown_args, options, false)
            .await
    }

    /// Sends prebuilt calldata to `to`.
    pub async fn send_payload(
        &self,
        to: Address,
        data: Bytes,
        options: SendOptions,
    ) -> Result<Option<B256>, SessionError> {
        let shown_args = vec![format!("0x{}", hex::encode(&data))];
        self.submit(to, data, "payload", shown_args, options, true)
            .await
    }

    async fn submit(
        &self,
        to: Address,
        data: Bytes,
        function: &str,
        args: Vec<String>,
        options: SendOptions,
        raw_payload: bool,
    ) -> Result<Option<B256>, SessionError> {
        if self.session.write_client().is_none() {
            return Err(SessionError::NoWriteClient);
        }
        let from = match options.from {
            Some(from) => from,
            None => parse_address(&self.first_account().await?)?,
        };

        let sent = self
            .session
            .with_write_client(
                |client| self.sign_and_send(client, from, to, data, &options, raw_payload),
                || Err(SessionError::NoWriteClient),
            )
            .await;

        let (hash, nonce) = match sent {
            Ok(sent) => sent,
            Err(e) if e.is_user_cancel() => {
                info!(function, "transaction cancelled by user");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let notice = TrxNotice {
            trx_hash: hash,
            network: self.session.current_network_id(),
            timestamp: now_millis(),
            contract: to,
            asset: options.asset,
            customer: from,
            function: options
                .display_name
                .unwrap_or_else(|| function.to_string()),
            args: options.display_args.unwrap_or(args),
            expected_nonce: nonce.map(|n| n + 1),
        };
        info!(trx_hash = %hash, function = %notice.function, "transaction sent");
        self.session.publish(SessionEvent::NewTransaction(notice));
        Ok(Some(hash))
    }

    /// Runs as one entry of the write client's queue, so gas and nonce are
    /// read only after the previous write on the same client has settled.
    ///
    /// Returns the transaction hash and the nonce the transaction is
    /// expected to use.
    async fn sign_and_send(
        &self,
        client: Arc<WriteClient>,
        from: Address,
        to: Address,
        data: Bytes,
        options: &SendOptions,
        raw_payload: bool,
    ) -> Result<(B256, Option<u64>), SessionError> {
        let estimator = GasEstimator::for_wallet(client.wallet_flavor());
        let request = CallRequest {
            from: Some(from),
            to: Some(to),
            data: Some(data.clone()),
            value: options.value,
        };
        let (read_client, gas, count) = self
            .session
            .with_read_client(move |client| prepare(client, estimator, request, raw_payload))
            .await?;

        let mut tx = TransactionRequest {
            from: Some(from),
            gas: Some(i64::try_from(gas).unwrap_or(i64::MAX)),
            to: Some(to_lower_hex(&to)),
            value: Some(options.value.unwrap_or_default()),
            data: Some(data),
            chain_id: self
                .session
                .current_network_id()
                .and_then(|id| i64::try_from(id.0).ok()),
            ..Default::default()
        };
        match (options.max_fee_per_gas, options.max_priority_fee_per_gas) {
            (Some(max_fee), Some(tip)) => {
                tx.max_fee_per_gas = Some(max_fee);
                tx.max_priority_fee_per_gas = Some(tip);
            }
            _ => {
                let price = options.gas_price.unwrap_or(self.default_gas_price);
                tx.gas_price = Some(i128::try_from(price).unwrap_or(i128::MAX));
            }
        }

        match client.backend() {
            // The wallet assigns the nonce itself.
            WriteBackend::Provider(provider) => {
                let hash = provider
                    .request("eth_sendTransaction", json!([to_rpc_json(&tx)]))
                    .await?;
                let hash = serde_json::from_value(hash).map_err(|e| {
                    SessionError::Network(RpcError::new(format!("bad transaction hash: {e}")))
                })?;
                Ok((hash, count))
            }
            WriteBackend::Hardware(signer) => {
                let nonce = client.next_nonce(count).ok_or_else(|| {
                    SessionError::Network(RpcError::new("cannot sign without a nonce"))
                })?;
                tx.nonce = i64::try_from(nonce).ok();
                debug!(nonce, fetched = ?count, "signing on hardware");
                let raw = signer.sign_transaction(&tx).await?;
                let hash = read_client.send_raw_transaction(raw.into()).await?;
                client.record_nonce(nonce);
                Ok((hash, Some(nonce)))
            }
        }
    }

    async fn first_account(&self) -> Result<String, SessionError> {
        self.session
            .accounts()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SessionError::SignerUnavailable("wallet reported no accounts".into()))
    }
}

/// Gas limit and transaction count, fetched together.
async fn prepare(
    client: ReadClient,
    estimator: GasEstimator,
    request: CallRequest,
    raw_payload: bool,
) -> Result<(ReadClient, u64, Option<u64>), SessionError> {
    let sender = request.from.unwrap_or_default();
    let (gas, nonce) = {
        let gas = async {
            if raw_payload {
                estimator.estimate_payload(client.as_ref(), &request).await
            } else {
                estimator.estimate(client.as_ref(), &request).await
            }
        };
        futures::join!(gas, transaction_count(client.as_ref(), sender))
    };
    Ok((client, gas, nonce))
}

/// Decodes the logs matching `event`; undecodable logs are skipped.
pub fn decode_events(abi: &ContractAbi, event: &str, logs: &[Log]) -> Vec<DecodedEvent> {
    let Some(event) = abi.event(event) else {
        return Vec::new();
    };
    logs.iter()
        .filter(|log| event.matches(&log.topics))
        .filter_map(|log| match event.decode(&log.topics, &log.data) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(error = %e, event = event.name(), "cannot decode log");
                None
            }
        })
        .collect()
}

/// Renders an ABI value the way it is reported in transaction events.
pub fn display_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Uint(n, _) => n.to_string(),
        DynSolValue::Int(n, _) => n.to_string(),
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Address(a) => a.to_checksum(None),
        DynSolValue::String(s) => s.clone(),
        DynSolValue::Bytes(b) => format!("0x{}", hex::encode(b)),
        DynSolValue::FixedBytes(word, size) => format!("0x{}", hex::encode(&word[..*size])),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            let items: Vec<String> = items.iter().map(display_value).collect();
            format!("[{}]", items.join(","))
        }
        other => format!("{other:?}"),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::ledger::{HardwareSignerQueue, LedgerSigner, DEFAULT_LEDGER_PATH};
    use crate::provider::WalletProvider;
    use crate::session::ProviderHandle;
    use crate::testing::{
        ctoken_address, test_registry, MockConnector, MockDevice, MockRpc, MockWallet, MAINNET_RPC,
    };
    use chain_eth::transaction::{decode_signed, UnsignedTransaction};

    struct Fixture {
        facade: TransactionFacade,
        rpc: Arc<MockRpc>,
    }

    fn fixture() -> Fixture {
        let connector = Arc::new(MockConnector::default());
        let rpc = connector.rpc(MAINNET_RPC);
        let session = Arc::new(ProviderSession::new(test_registry(), connector));
        Fixture {
            facade: TransactionFacade::new(session),
            rpc,
        }
    }

    fn attach(f: &Fixture) {
        f.facade
            .session()
            .set_network(Some(NetworkId::MAINNET))
            .unwrap();
    }

    fn uint(n: u64) -> DynSolValue {
        DynSolValue::Uint(U256::from(n), 256)
    }

    #[tokio::test]
    async fn call_decodes_single_value() {
        let f = fixture();
        attach(&f);
        f.rpc.set_call_output(uint(42).abi_encode());

        let call = ContractCall::new(
            "CToken",
            ctoken_address(),
            "balanceOf",
            vec![DynSolValue::Address(Address::repeat_byte(0x22))],
        );
        let value = f.facade.call_contract(&call).await.unwrap();
        assert_eq!(value, uint(42));

        let sent = f.rpc.calls();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.to, Some(ctoken_address()));
        assert_eq!(sent[0].1, BlockTag::Latest);
    }

    #[tokio::test]
    async fn call_waits_for_a_read_client() {
        let f = fixture();
        f.rpc.set_call_output(uint(7).abi_encode());
        let call = ContractCall::new("CToken", ctoken_address(), "totalSupply", vec![]);

        let (value, ()) = tokio::join!(f.facade.call_contract(&call), async {
            tokio::task::yield_now().await;
            attach(&f);
        });
        assert_eq!(value.unwrap(), uint(7));
    }

    #[tokio::test]
    async fn unknown_method_is_a_configuration_error() {
        let f = fixture();
        attach(&f);
        let call = ContractCall::new("CToken", ctoken_address(), "balanceOf", vec![]);
        let err = f.facade.call_contract(&call).await.unwrap_err();
        assert!(err.is_configuration());
        assert!(f.rpc.calls().is_empty());
    }

    #[tokio::test]
    async fn call_or_else_hands_errors_to_the_handler() {
        let f = fixture();
        attach(&f);
        f.rpc.fail_calls("execution reverted");
        let call = ContractCall::new("CToken", ctoken_address(), "totalSupply", vec![]);

        let value = f
            .facade
            .call_or_else(&call, |e| {
                assert!(matches!(e, SessionError::Network(_)));
                uint(0)
            })
            .await;
        assert_eq!(value, uint(0));
    }

    #[tokio::test]
    async fn call_all_uses_one_client() {
        let f = fixture();
        attach(&f);
        f.rpc.set_call_output(uint(3).abi_encode());
        let calls = vec![
            ContractCall::new("CToken", ctoken_address(), "totalSupply", vec![]),
            ContractCall::new("CToken", ctoken_address(), "totalSupply", vec![]).at_block(Some(9)),
        ];

        let values = f.facade.call_all(&calls).await.unwrap();
        assert_eq!(values, vec![uint(3), uint(3)]);
        assert_eq!(f.rpc.calls()[1].1, BlockTag::Number(9));
    }

    #[tokio::test]
    async fn send_through_wallet_publishes_notice() {
        let f = fixture();
        attach(&f);
        let wallet = Arc::new(MockWallet::new());
        f.facade
            .session()
            .set_write_provider(Some(ProviderHandle::injected(wallet.clone())), None);
        f.rpc.set_gas_estimate(100_000);
        f.rpc.set_transaction_count(4);
        let mut events = f.facade.session().subscribe();

        let hash = f
            .facade
            .send(
                "CToken",
                ctoken_address(),
                "mint",
                &[uint(1_000)],
                SendOptions::default(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hash, wallet.last_sent_hash().unwrap());

        let params = wallet.sent_transactions();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0]["gas"], "0x1dca4");
        assert_eq!(params[0]["gasPrice"], "0x1dcd65000");
        assert!(params[0].get("nonce").is_none());

        match events.recv().await.unwrap() {
            SessionEvent::NewTransaction(notice) => {
                assert_eq!(notice.trx_hash, hash);
                assert_eq!(notice.function, "mint");
                assert_eq!(notice.args, vec!["1000".to_string()]);
                assert_eq!(notice.expected_nonce, Some(5));
                assert_eq!(notice.contract, ctoken_address());
                assert_eq!(notice.network, Some(NetworkId::MAINNET));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn display_overrides_and_failed_lookups() {
        let f = fixture();
        attach(&f);
        let wallet = Arc::new(MockWallet::new());
        f.facade
            .session()
            .set_write_provider(Some(ProviderHandle::injected(wallet.clone())), None);
        f.rpc.fail_estimates("execution reverted");
        f.rpc.fail_transaction_count("timeout");
        let mut events = f.facade.session().subscribe();

        let options = SendOptions {
            display_name: Some("Supply".into()),
            display_args: Some(vec!["1 DAI".into()]),
            ..Default::default()
        };
        f.facade
            .send("CToken", ctoken_address(), "mint", &[uint(1)], options)
            .await
            .unwrap();

        assert_eq!(wallet.sent_transactions()[0]["gas"], "0x86c54");
        assert!(wallet.sent_transactions()[0].get("nonce").is_none());
        let SessionEvent::NewTransaction(notice) = events.recv().await.unwrap() else {
            panic!("expected a transaction notice");
        };
        assert_eq!(notice.function, "Supply");
        assert_eq!(notice.args, vec!["1 DAI".to_string()]);
        assert_eq!(notice.expected_nonce, None);
    }

    #[tokio::test]
    async fn user_cancel_resolves_to_none() {
        let f = fixture();
        attach(&f);
        let wallet = Arc::new(MockWallet::new());
        wallet.fail_sends(RpcError::new(
            "Returned error: Error: MetaMask Tx Signature: User denied transaction signature.",
        ));
        f.facade
            .session()
            .set_write_provider(Some(ProviderHandle::injected(wallet.clone())), None);

        let sent = f
            .facade
            .send("CToken", ctoken_address(), "mint", &[uint(1)], SendOptions::default())
            .await
            .unwrap();
        assert_eq!(sent, None);

        wallet.fail_sends(RpcError::with_code(4001, "User rejected the request."));
        let sent = f
            .facade
            .send("CToken", ctoken_address(), "mint", &[uint(1)], SendOptions::default())
            .await
            .unwrap();
        assert_eq!(sent, None);
    }

    #[tokio::test]
    async fn other_send_failures_propagate() {
        let f = fixture();
        attach(&f);
        let wallet = Arc::new(MockWallet::new());
        wallet.fail_sends(RpcError::with_code(-32000, "insufficient funds"));
        f.facade
            .session()
            .set_write_provider(Some(ProviderHandle::injected(wallet)), None);

        let err = f
            .facade
            .send("CToken", ctoken_address(), "mint", &[uint(1)], SendOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Network(_)));
    }

    #[tokio::test]
    async fn send_without_write_client_is_a_caller_error() {
        let f = fixture();
        attach(&f);
        let err = f
            .facade
            .send("CToken", ctoken_address(), "mint", &[uint(1)], SendOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NoWriteClient));
        assert_eq!(
            err.to_string(),
            "Cannot send transaction without a transaction provider"
        );
    }

    #[tokio::test]
    async fn hardware_send_signs_and_broadcasts_raw() {
        let f = fixture();
        attach(&f);
        let device = Arc::new(MockDevice::new());
        let signer = LedgerSigner::new(
            HardwareSignerQueue::connect(device.clone()),
            DEFAULT_LEDGER_PATH,
            NetworkId::MAINNET,
        );
        f.facade
            .session()
            .set_write_provider(Some(ProviderHandle::ledger(Arc::new(signer))), None);
        f.rpc.set_gas_estimate(21_000);
        f.rpc.set_transaction_count(9);

        let options = SendOptions {
            max_fee_per_gas: Some(30_000_000_000),
            max_priority_fee_per_gas: Some(1_000_000_000),
            ..Default::default()
        };
        let hash = f
            .facade
            .send_payload(ctoken_address(), Bytes::from(vec![0x12, 0x34]), options)
            .await
            .unwrap()
            .unwrap();

        let raw = f.rpc.raw_transactions();
        assert_eq!(raw.len(), 1);
        assert_eq!(hash, chain_eth::transaction::transaction_hash(&raw[0]));
        assert_eq!(device.recover_signer(&raw[0]), device.address());

        let signed = decode_signed(&raw[0]).unwrap();
        match signed.transaction {
            UnsignedTransaction::Eip1559(tx) => {
                assert_eq!(tx.nonce, 9);
                assert_eq!(tx.chain_id, 1);
                // 21_000 -> 26_250 -> 20_000 < 21_000 -> 30_000, plus suffix.
                assert_eq!(tx.gas_limit, 32_020);
            }
            other => panic!("expected a typed transaction, got {other:?}"),
        }
    }

    /// Wallet that notes how many gas estimates the node had served when
    /// each transaction reached it.
    struct CountingWallet {
        inner: MockWallet,
        rpc: Arc<MockRpc>,
        estimates_at_send: std::sync::Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl WalletProvider for CountingWallet {
        async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
            if method == "eth_sendTransaction" {
                tokio::task::yield_now().await;
                self.estimates_at_send
                    .lock()
                    .unwrap()
                    .push(self.rpc.estimate_calls());
            }
            self.inner.request(method, params).await
        }
    }

    #[tokio::test]
    async fn concurrent_sends_prepare_after_the_previous_send() {
        let f = fixture();
        attach(&f);
        let wallet = Arc::new(CountingWallet {
            inner: MockWallet::new(),
            rpc: f.rpc.clone(),
            estimates_at_send: Default::default(),
        });
        f.facade
            .session()
            .set_write_provider(Some(ProviderHandle::injected(wallet.clone())), None);
        f.rpc.set_transaction_count(4);
        let options = || SendOptions {
            from: Some(Address::repeat_byte(0x5a)),
            ..Default::default()
        };

        let mint_one = [uint(1)];
        let mint_two = [uint(2)];
        let (first, second) = tokio::join!(
            f.facade
                .send("CToken", ctoken_address(), "mint", &mint_one, options()),
            f.facade
                .send("CToken", ctoken_address(), "mint", &mint_two, options()),
        );
        assert_ne!(first.unwrap(), second.unwrap());

        assert_eq!(*wallet.estimates_at_send.lock().unwrap(), vec![1, 2]);
        let sent = wallet.inner.sent_transactions();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|tx| tx.get("nonce").is_none()));
    }

    #[tokio::test]
    async fn concurrent_hardware_sends_use_consecutive_nonces() {
        let f = fixture();
        attach(&f);
        let device = Arc::new(MockDevice::new());
        let signer = LedgerSigner::new(
            HardwareSignerQueue::connect(device.clone()),
            DEFAULT_LEDGER_PATH,
            NetworkId::MAINNET,
        );
        f.facade
            .session()
            .set_write_provider(Some(ProviderHandle::ledger(Arc::new(signer))), None);
        f.rpc.set_transaction_count(4);
        let mut events = f.facade.session().subscribe();

        let payload = || Bytes::from(vec![0x12, 0x34]);
        let (first, second) = tokio::join!(
            f.facade
                .send_payload(ctoken_address(), payload(), SendOptions::default()),
            f.facade
                .send_payload(ctoken_address(), payload(), SendOptions::default()),
        );
        assert_ne!(first.unwrap(), second.unwrap());

        let nonces: Vec<u64> = f
            .rpc
            .raw_transactions()
            .iter()
            .map(|raw| decode_signed(raw).unwrap().transaction.nonce())
            .collect();
        assert_eq!(nonces, vec![4, 5]);
        for expected in [5, 6] {
            let SessionEvent::NewTransaction(notice) = events.recv().await.unwrap() else {
                panic!("expected a transaction notice");
            };
            assert_eq!(notice.expected_nonce, Some(expected));
        }
    }

    #[tokio::test]
    async fn sign_message_routes_to_wallet() {
        let f = fixture();
        let wallet = Arc::new(MockWallet::new());
        f.facade
            .session()
            .set_write_provider(Some(ProviderHandle::injected(wallet.clone())), None);

        let signature = f.facade.sign_message(b"hi", None).await.unwrap();
        assert!(signature.starts_with("0x"));
        assert!(wallet.requested("personal_sign"));

        f.facade.session().set_write_provider(None, None);
        assert!(matches!(
            f.facade.sign_message(b"hi", Some("0xabc")).await,
            Err(SessionError::NoWriteClient)
        ));
    }

    #[tokio::test]
    async fn events_are_decoded() {
        let f = fixture();
        attach(&f);
        let abi = f.facade.session().abi("CToken").unwrap();
        let transfer = abi.event("Transfer").unwrap().signature();
        let from = Address::repeat_byte(0x01);
        let to = Address::repeat_byte(0x02);
        f.rpc.set_logs(vec![
            Log {
                address: ctoken_address(),
                topics: vec![transfer, from.into_word(), to.into_word()],
                data: uint(5).abi_encode().into(),
                block_number: Some(10),
                transaction_hash: None,
            },
            Log {
                address: ctoken_address(),
                topics: vec![B256::repeat_byte(0xee)],
                data: Bytes::new(),
                block_number: Some(11),
                transaction_hash: None,
            },
        ]);

        let events = f
            .facade
            .get_events("CToken", ctoken_address(), "Transfer", Some(1), None)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].indexed, vec![DynSolValue::Address(from), DynSolValue::Address(to)]);
        assert_eq!(events[0].body, vec![uint(5)]);

        let filter = f.rpc.log_filters().pop().unwrap();
        assert_eq!(filter.topics, vec![Some(transfer)]);
        assert_eq!(filter.from_block, BlockTag::Number(1));
        assert_eq!(filter.to_block, BlockTag::Latest);
    }

    #[tokio::test]
    async fn read_helpers_pass_through() {
        let f = fixture();
        attach(&f);
        f.rpc.set_block_number(77);
        f.rpc.set_balance(U256::from(5u64));
        f.rpc.set_transaction_count(2);

        assert_eq!(f.facade.get_block_number().await.unwrap(), 77);
        assert_eq!(
            f.facade.get_balance(Address::ZERO).await.unwrap(),
            U256::from(5u64)
        );
        assert_eq!(f.facade.get_transaction_count(Address::ZERO).await.unwrap(), 2);
        assert_eq!(f.facade.get_transaction(B256::ZERO).await.unwrap(), None);
        assert_eq!(
            f.facade.get_transaction_receipt(B256::ZERO).await.unwrap(),
            None
        );
    }

    #[test]
    fn display_values() {
        assert_eq!(display_value(&uint(10)), "10");
        assert_eq!(display_value(&DynSolValue::Bool(true)), "true");
        assert_eq!(
            display_value(&DynSolValue::Bytes(vec![0xde, 0xad])),
            "0xdead"
        );
        assert_eq!(
            display_value(&DynSolValue::Array(vec![uint(1), uint(2)])),
            "[1,2]"
        );
        let shown = display_value(&DynSolValue::Address(Address::repeat_byte(0xaa)));
        assert!(shown.eq_ignore_ascii_case("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"));
    }

    #[test]
    fn default_gas_price_override() {
        let f = fixture();
        assert_eq!(f.facade.default_gas_price(), 8_000_000_000);
        let facade = TransactionFacade::new(f.facade.session().clone()).with_default_gas_price(Some(1));
        assert_eq!(facade.default_gas_price(), 1);
    }
}
