use bytes::{Buf, Bytes};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::tick::{Ohlc, TickEvent};
use crate::instruments::{AssetClass, InstrumentDirectory};

/// Packet mode selectors as defined by the upstream wire protocol.
pub const MODE_LTP: u8 = 1;
pub const MODE_QUOTE: u8 = 2;
pub const MODE_FULL: u8 = 3;

/// 2-byte unsigned packet count.
const FRAME_HEADER_LEN: usize = 2;
/// 4-byte token + 1-byte tradable flag + 1-byte mode.
const SUBPACKET_HEADER_LEN: usize = 6;
const LTP_BODY_LEN: usize = 4;
const QUOTE_BODY_LEN: usize = 24;
const FULL_BODY_LEN: usize = 40;
/// Trailing FULL fields (last trade time, OI triplet, exchange timestamp)
/// are present on newer feed versions only.
const FULL_EXTENDED_LEN: usize = 20;

/// Bytes skipped to resynchronize after a sub-packet with an unknown mode.
const RECOVERY_STRIDE: usize = 4;

/// Sane bound on the declared per-frame packet count.
const MIN_PACKET_COUNT: u16 = 1;
const MAX_PACKET_COUNT: u16 = 100;

/// Per-frame decode failure. Contained by the caller: one bad frame is
/// dropped and the ingestion loop continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TickParseError {
    #[error("frame too short: {0} bytes (minimum {FRAME_HEADER_LEN})")]
    FrameTooShort(usize),

    #[error("invalid packet count: {0}")]
    InvalidPacketCount(u16),

    #[error("truncated sub-packet {index}: mode {mode} needs {needed} bytes, {remaining} remain")]
    TruncatedPacket {
        index: usize,
        mode: u8,
        needed: usize,
        remaining: usize,
    },
}

/// Byte order a frame is decoded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireByteOrder {
    Big,
    Little,
}

/// Bounded anomaly logger: the first `limit` anomalies are logged, the rest
/// are counted silently. Replaces ad hoc first-N debug counters with an
/// explicit, shareable budget.
#[derive(Debug)]
pub struct DiagnosticSampler {
    remaining: AtomicU32,
}

impl DiagnosticSampler {
    pub fn new(limit: u32) -> Self {
        Self {
            remaining: AtomicU32::new(limit),
        }
    }

    /// Consumes one unit of budget; returns whether this anomaly should be
    /// logged in full.
    pub fn should_log(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok()
    }
}

/// Stateless binary frame decoder.
///
/// One transport message carries one frame: a 2-byte packet count followed
/// by that many variable-length sub-packets. The protocol documents
/// big-endian network order, but the upstream has been observed to deliver
/// little-endian payloads intermittently, so the packet count is validated
/// under big-endian first, retried under little-endian, and decoded
/// best-effort big-endian when neither is plausible. Every byte-order
/// fallback is an anomaly worth surfacing and goes through the sampler.
pub struct TickDecoder {
    directory: Arc<InstrumentDirectory>,
    diagnostics: DiagnosticSampler,
}

impl TickDecoder {
    pub fn new(directory: Arc<InstrumentDirectory>, diagnostics: DiagnosticSampler) -> Self {
        Self {
            directory,
            diagnostics,
        }
    }

    /// Decodes one raw frame into wire-ordered tick events.
    ///
    /// A sub-packet with an unknown mode byte is skipped over a fixed
    /// recovery stride instead of aborting the frame, so one corrupt
    /// sub-packet cannot lose the rest of the message.
    pub fn decode(&self, frame: &[u8]) -> Result<Vec<TickEvent>, TickParseError> {
        if frame.len() < FRAME_HEADER_LEN {
            return Err(TickParseError::FrameTooShort(frame.len()));
        }

        let (order, count) = self.detect_byte_order(frame)?;
        let raw_frame = Bytes::copy_from_slice(frame);
        let mut buf = &frame[FRAME_HEADER_LEN..];
        let mut ticks = Vec::with_capacity(usize::from(count.min(MAX_PACKET_COUNT)));

        for index in 0..usize::from(count) {
            if buf.remaining() < SUBPACKET_HEADER_LEN {
                warn!(
                    declared = count,
                    decoded = ticks.len(),
                    remaining = buf.remaining(),
                    "frame ended before all declared sub-packets"
                );
                break;
            }

            let token = u64::from(get_u32(&mut buf, order));
            let _tradable = buf.get_u8();
            let mode = buf.get_u8();

            match mode {
                MODE_LTP | MODE_QUOTE | MODE_FULL => {
                    let needed = body_len(mode);
                    if buf.remaining() < needed {
                        return Err(TickParseError::TruncatedPacket {
                            index,
                            mode,
                            needed,
                            remaining: buf.remaining(),
                        });
                    }
                    let tick = match mode {
                        MODE_LTP => self.decode_ltp(&mut buf, order, token, &raw_frame),
                        MODE_QUOTE => self.decode_quote(&mut buf, order, token, &raw_frame),
                        _ => self.decode_full(&mut buf, order, token, &raw_frame),
                    };
                    ticks.push(tick);
                }
                other => {
                    if self.diagnostics.should_log() {
                        warn!(
                            token,
                            mode = other,
                            index,
                            "unknown sub-packet mode, skipping recovery stride"
                        );
                    }
                    let stride = RECOVERY_STRIDE.min(buf.remaining());
                    buf.advance(stride);
                }
            }
        }

        Ok(ticks)
    }

    fn detect_byte_order(&self, frame: &[u8]) -> Result<(WireByteOrder, u16), TickParseError> {
        let be = u16::from_be_bytes([frame[0], frame[1]]);
        if (MIN_PACKET_COUNT..=MAX_PACKET_COUNT).contains(&be) {
            return Ok((WireByteOrder::Big, be));
        }

        let le = u16::from_le_bytes([frame[0], frame[1]]);
        if (MIN_PACKET_COUNT..=MAX_PACKET_COUNT).contains(&le) {
            if self.diagnostics.should_log() {
                warn!(
                    count_be = be,
                    count_le = le,
                    "packet count only plausible little-endian, decoding frame as little-endian"
                );
            }
            return Ok((WireByteOrder::Little, le));
        }

        if be == 0 {
            return Err(TickParseError::InvalidPacketCount(be));
        }

        // Neither interpretation is in range; proceed best-effort under the
        // documented big-endian order and let the length checks bound the
        // damage.
        if self.diagnostics.should_log() {
            warn!(
                count_be = be,
                count_le = le,
                "packet count implausible in both byte orders, decoding best-effort big-endian"
            );
        }
        Ok((WireByteOrder::Big, be))
    }

    fn decode_ltp(
        &self,
        buf: &mut &[u8],
        order: WireByteOrder,
        token: u64,
        raw_frame: &Bytes,
    ) -> TickEvent {
        let price = price_from_raw(get_i32(buf, order));
        self.build_tick(token, price, 0, Ohlc::zero(), Utc::now(), raw_frame)
    }

    fn decode_quote(
        &self,
        buf: &mut &[u8],
        order: WireByteOrder,
        token: u64,
        raw_frame: &Bytes,
    ) -> TickEvent {
        let price = price_from_raw(get_i32(buf, order));
        let _last_quantity = get_i32(buf, order);
        let _average_price = get_i32(buf, order);
        let volume = get_i32(buf, order) as u32 as u64;
        let _buy_quantity = get_i32(buf, order);
        let _sell_quantity = get_i32(buf, order);
        self.build_tick(token, price, volume, Ohlc::zero(), Utc::now(), raw_frame)
    }

    fn decode_full(
        &self,
        buf: &mut &[u8],
        order: WireByteOrder,
        token: u64,
        raw_frame: &Bytes,
    ) -> TickEvent {
        let price = price_from_raw(get_i32(buf, order));
        let _last_quantity = get_i32(buf, order);
        let _average_price = get_i32(buf, order);
        let volume = get_i32(buf, order) as u32 as u64;
        let _buy_quantity = get_i32(buf, order);
        let _sell_quantity = get_i32(buf, order);

        let ohlc = Ohlc {
            open: price_from_raw(get_i32(buf, order)),
            high: price_from_raw(get_i32(buf, order)),
            low: price_from_raw(get_i32(buf, order)),
            close: price_from_raw(get_i32(buf, order)),
        };

        // Trailing fields are optional on the wire; the exchange timestamp,
        // when present and positive, is authoritative for the tick.
        let mut timestamp = Utc::now();
        if buf.remaining() >= FULL_EXTENDED_LEN {
            let _last_trade_time = get_i32(buf, order);
            let _open_interest = get_i32(buf, order);
            let _oi_day_high = get_i32(buf, order);
            let _oi_day_low = get_i32(buf, order);
            let epoch_secs = get_i32(buf, order) as u32;
            if epoch_secs > 0 {
                if let Some(exchange_ts) = DateTime::<Utc>::from_timestamp(i64::from(epoch_secs), 0)
                {
                    timestamp = exchange_ts;
                }
            }
        }

        self.build_tick(token, price, volume, ohlc, timestamp, raw_frame)
    }

    fn build_tick(
        &self,
        token: u64,
        last_traded_price: Decimal,
        volume: u64,
        ohlc: Ohlc,
        timestamp: DateTime<Utc>,
        raw_frame: &Bytes,
    ) -> TickEvent {
        let (symbol, asset_class) = match self.directory.resolve(token) {
            Some(record) => (record.symbol, record.asset_class),
            None => {
                // Never drop a packet just because metadata is missing; fall
                // back to the token itself as the symbol.
                debug!(token, "token not in instrument directory, using fallback symbol");
                (token.to_string(), AssetClass::Stock)
            }
        };

        TickEvent {
            symbol,
            token,
            asset_class,
            timestamp,
            last_traded_price,
            volume,
            ohlc,
            raw_frame: raw_frame.clone(),
        }
    }
}

fn body_len(mode: u8) -> usize {
    match mode {
        MODE_LTP => LTP_BODY_LEN,
        MODE_QUOTE => QUOTE_BODY_LEN,
        _ => FULL_BODY_LEN,
    }
}

/// Prices travel as integer paise: raw / 100 with exactly two decimals.
fn price_from_raw(raw: i32) -> Decimal {
    Decimal::new(i64::from(raw), 2)
}

fn get_u32(buf: &mut &[u8], order: WireByteOrder) -> u32 {
    match order {
        WireByteOrder::Big => buf.get_u32(),
        WireByteOrder::Little => buf.get_u32_le(),
    }
}

fn get_i32(buf: &mut &[u8], order: WireByteOrder) -> i32 {
    match order {
        WireByteOrder::Big => buf.get_i32(),
        WireByteOrder::Little => buf.get_i32_le(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments::{InstrumentRow, MemoryBlobCache, StaticInstrumentSource};
    use rust_decimal_macros::dec;

    const NIFTY_TOKEN: u64 = 256265;
    const RELIANCE_TOKEN: u64 = 738561;

    async fn test_decoder(diag_limit: u32) -> TickDecoder {
        let source = StaticInstrumentSource::new(
            vec![InstrumentRow {
                token: NIFTY_TOKEN,
                exchange_token: 1001,
                symbol: "NIFTY 50".to_string(),
                expiry: None,
                lot_size: 1,
                name: None,
            }],
            vec![InstrumentRow {
                token: RELIANCE_TOKEN,
                exchange_token: 2885,
                symbol: "RELIANCE".to_string(),
                expiry: None,
                lot_size: 1,
                name: Some("Reliance Industries".to_string()),
            }],
        );
        let directory = Arc::new(InstrumentDirectory::new(
            Arc::new(source),
            Arc::new(MemoryBlobCache::new()),
        ));
        directory.load().await.unwrap();
        TickDecoder::new(directory, DiagnosticSampler::new(diag_limit))
    }

    struct FrameBuilder {
        order: WireByteOrder,
        body: Vec<u8>,
        count: u16,
    }

    impl FrameBuilder {
        fn new(order: WireByteOrder) -> Self {
            Self {
                order,
                body: Vec::new(),
                count: 0,
            }
        }

        fn push_u16(bytes: &mut Vec<u8>, order: WireByteOrder, value: u16) {
            match order {
                WireByteOrder::Big => bytes.extend_from_slice(&value.to_be_bytes()),
                WireByteOrder::Little => bytes.extend_from_slice(&value.to_le_bytes()),
            }
        }

        fn push_i32(&mut self, value: i32) {
            match self.order {
                WireByteOrder::Big => self.body.extend_from_slice(&value.to_be_bytes()),
                WireByteOrder::Little => self.body.extend_from_slice(&value.to_le_bytes()),
            }
        }

        fn subpacket_header(&mut self, token: u32, mode: u8) {
            self.push_i32(token as i32);
            self.body.push(0); // tradable flag
            self.body.push(mode);
            self.count += 1;
        }

        fn ltp(mut self, token: u32, raw_price: i32) -> Self {
            self.subpacket_header(token, MODE_LTP);
            self.push_i32(raw_price);
            self
        }

        fn quote(mut self, token: u32, raw_price: i32, volume: i32) -> Self {
            self.subpacket_header(token, MODE_QUOTE);
            self.push_i32(raw_price);
            self.push_i32(10); // last quantity
            self.push_i32(raw_price); // average price
            self.push_i32(volume);
            self.push_i32(500); // buy quantity
            self.push_i32(400); // sell quantity
            self
        }

        #[allow(clippy::too_many_arguments)]
        fn full(
            mut self,
            token: u32,
            raw_price: i32,
            volume: i32,
            raw_ohlc: [i32; 4],
            epoch_secs: i32,
        ) -> Self {
            self.subpacket_header(token, MODE_FULL);
            self.push_i32(raw_price);
            self.push_i32(10);
            self.push_i32(raw_price);
            self.push_i32(volume);
            self.push_i32(500);
            self.push_i32(400);
            for raw in raw_ohlc {
                self.push_i32(raw);
            }
            self.push_i32(epoch_secs); // last trade time
            self.push_i32(0); // open interest
            self.push_i32(0); // OI day high
            self.push_i32(0); // OI day low
            self.push_i32(epoch_secs);
            self
        }

        fn corrupt(mut self, token: u32, mode: u8, junk: &[u8]) -> Self {
            self.subpacket_header(token, mode);
            self.body.extend_from_slice(junk);
            self
        }

        fn build(self) -> Vec<u8> {
            let mut frame = Vec::with_capacity(2 + self.body.len());
            Self::push_u16(&mut frame, self.order, self.count);
            frame.extend_from_slice(&self.body);
            frame
        }
    }

    #[tokio::test]
    async fn ltp_frame_resolves_symbol_and_price() {
        let decoder = test_decoder(3).await;
        let frame = FrameBuilder::new(WireByteOrder::Big)
            .ltp(NIFTY_TOKEN as u32, 2375425)
            .build();

        let ticks = decoder.decode(&frame).unwrap();
        assert_eq!(ticks.len(), 1);
        let tick = &ticks[0];
        assert_eq!(tick.symbol, "NIFTY 50");
        assert_eq!(tick.asset_class, AssetClass::Index);
        assert_eq!(tick.last_traded_price, dec!(23754.25));
        assert_eq!(tick.volume, 0);
        assert_eq!(tick.raw_frame.as_ref(), frame.as_slice());
    }

    #[tokio::test]
    async fn unknown_token_falls_back_to_stringified_token() {
        let decoder = test_decoder(3).await;
        let frame = FrameBuilder::new(WireByteOrder::Big).ltp(999999, 12345).build();

        let ticks = decoder.decode(&frame).unwrap();
        assert_eq!(ticks[0].symbol, "999999");
        assert_eq!(ticks[0].asset_class, AssetClass::Stock);
        assert_eq!(ticks[0].last_traded_price, dec!(123.45));
    }

    #[tokio::test]
    async fn multi_packet_frame_decodes_in_wire_order() {
        let decoder = test_decoder(3).await;
        let frame = FrameBuilder::new(WireByteOrder::Big)
            .ltp(NIFTY_TOKEN as u32, 2375425)
            .quote(RELIANCE_TOKEN as u32, 287550, 1_250_000)
            .full(
                RELIANCE_TOKEN as u32,
                287600,
                1_300_000,
                [287000, 288000, 286500, 287100],
                1_700_000_000,
            )
            .build();

        let ticks = decoder.decode(&frame).unwrap();
        assert_eq!(ticks.len(), 3);
        assert_eq!(ticks[0].symbol, "NIFTY 50");
        assert_eq!(ticks[1].symbol, "RELIANCE");
        assert_eq!(ticks[1].volume, 1_250_000);
        assert_eq!(ticks[2].last_traded_price, dec!(2876.00));
        assert_eq!(ticks[2].ohlc.high, dec!(2880.00));
        assert_eq!(
            ticks[2].timestamp,
            DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn hundred_packet_frame_yields_hundred_ticks() {
        let decoder = test_decoder(3).await;
        let mut builder = FrameBuilder::new(WireByteOrder::Big);
        for i in 0..100 {
            builder = builder.ltp(NIFTY_TOKEN as u32, 100_00 + i);
        }
        let ticks = decoder.decode(&builder.build()).unwrap();
        assert_eq!(ticks.len(), 100);
        assert_eq!(ticks[99].last_traded_price, dec!(100.99));
    }

    #[tokio::test]
    async fn little_endian_frame_is_detected_and_decoded() {
        let decoder = test_decoder(3).await;
        // A count of 1 little-endian reads as 256 big-endian, which is out
        // of range and triggers the retry.
        let frame = FrameBuilder::new(WireByteOrder::Little)
            .ltp(NIFTY_TOKEN as u32, 2375425)
            .build();

        let ticks = decoder.decode(&frame).unwrap();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].symbol, "NIFTY 50");
        assert_eq!(ticks[0].last_traded_price, dec!(23754.25));
    }

    #[tokio::test]
    async fn corrupt_mode_does_not_abort_following_packets() {
        let decoder = test_decoder(3).await;
        let frame = FrameBuilder::new(WireByteOrder::Big)
            .corrupt(NIFTY_TOKEN as u32, 9, &[0xDE, 0xAD, 0xBE, 0xEF])
            .ltp(RELIANCE_TOKEN as u32, 287550)
            .build();

        let ticks = decoder.decode(&frame).unwrap();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].symbol, "RELIANCE");
    }

    #[tokio::test]
    async fn rejects_short_and_empty_frames() {
        let decoder = test_decoder(3).await;
        assert_eq!(decoder.decode(&[]), Err(TickParseError::FrameTooShort(0)));
        assert_eq!(decoder.decode(&[1]), Err(TickParseError::FrameTooShort(1)));
    }

    #[tokio::test]
    async fn rejects_zero_packet_count() {
        let decoder = test_decoder(3).await;
        assert_eq!(
            decoder.decode(&[0, 0]),
            Err(TickParseError::InvalidPacketCount(0))
        );
    }

    #[tokio::test]
    async fn truncated_valid_mode_is_a_parse_error() {
        let decoder = test_decoder(3).await;
        let mut frame = FrameBuilder::new(WireByteOrder::Big)
            .ltp(NIFTY_TOKEN as u32, 2375425)
            .build();
        frame.truncate(frame.len() - 2);

        match decoder.decode(&frame) {
            Err(TickParseError::TruncatedPacket { mode, needed, .. }) => {
                assert_eq!(mode, MODE_LTP);
                assert_eq!(needed, LTP_BODY_LEN);
            }
            other => panic!("expected truncation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_without_extension_uses_receipt_time() {
        let decoder = test_decoder(3).await;
        let mut builder = FrameBuilder::new(WireByteOrder::Big);
        builder.subpacket_header(RELIANCE_TOKEN as u32, MODE_FULL);
        for raw in [287550, 10, 287550, 1_000, 500, 400, 287000, 288000, 286500, 287100] {
            builder.push_i32(raw);
        }
        let before = Utc::now();
        let ticks = decoder.decode(&builder.build()).unwrap();
        assert_eq!(ticks.len(), 1);
        assert!(ticks[0].timestamp >= before);
    }

    #[test]
    fn diagnostic_sampler_is_bounded() {
        let sampler = DiagnosticSampler::new(2);
        assert!(sampler.should_log());
        assert!(sampler.should_log());
        assert!(!sampler.should_log());
        assert!(!sampler.should_log());
    }
}
