use crate::error::{CodecError, CodecResult};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

pub const MAX_CODE_LEN: usize = 16;

/// Table as carried in a DHT segment: code counts per length plus the
/// symbols in code order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HuffmanSpec {
    pub class: u8,
    pub id: u8,
    pub counts: [u8; MAX_CODE_LEN],
    pub values: Vec<u8>,
}

impl HuffmanSpec {
    /// Builds an optimal length-limited table (ITU T.81 Annex K.2).
    ///
    /// A reserved pseudo-symbol keeps the all-ones code of the longest
    /// length unused, so 1-bit padding never decodes as a symbol.
    pub fn from_frequencies(id: u8, frequencies: &[u32; 256]) -> Self {
        if frequencies.iter().all(|&f| f == 0) {
            return Self {
                class: 0,
                id,
                counts: [0; MAX_CODE_LEN],
                values: Vec::new(),
            };
        }

        let mut freq: Vec<u64> = frequencies.iter().map(|&f| f as u64).collect();
        freq.push(1);
        let mut code_size = vec![0usize; 257];
        let mut others = vec![None::<usize>; 257];

        loop {
            let Some(v1) = least_frequent(&freq, None) else {
                break;
            };
            let Some(v2) = least_frequent(&freq, Some(v1)) else {
                break;
            };

            freq[v1] += freq[v2];
            freq[v2] = 0;

            let mut node = v1;
            code_size[node] += 1;
            while let Some(next) = others[node] {
                node = next;
                code_size[node] += 1;
            }
            others[node] = Some(v2);

            let mut node = v2;
            code_size[node] += 1;
            while let Some(next) = others[node] {
                node = next;
                code_size[node] += 1;
            }
        }

        let longest = code_size.iter().copied().max().unwrap_or(0);
        let mut bits = vec![0usize; longest.max(MAX_CODE_LEN) + 1];
        for &size in code_size.iter().filter(|&&s| s > 0) {
            bits[size] += 1;
        }

        // K.3: fold lengths above 16 back into the tree.
        let mut i = bits.len() - 1;
        while i > MAX_CODE_LEN {
            while bits[i] > 0 {
                let mut j = i - 2;
                while bits[j] == 0 {
                    j -= 1;
                }
                bits[i] -= 2;
                bits[i - 1] += 1;
                bits[j + 1] += 2;
                bits[j] -= 1;
            }
            i -= 1;
        }

        // Drop the reserved code from the longest length in use.
        let mut i = MAX_CODE_LEN;
        while bits[i] == 0 {
            i -= 1;
        }
        bits[i] -= 1;

        let mut counts = [0u8; MAX_CODE_LEN];
        for (len, count) in counts.iter_mut().enumerate() {
            *count = bits[len + 1] as u8;
        }

        let mut values = Vec::new();
        for size in 1..=longest {
            for (symbol, &s) in code_size.iter().enumerate().take(256) {
                if s == size {
                    values.push(symbol as u8);
                }
            }
        }

        Self {
            class: 0,
            id,
            counts,
            values,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        buf.write_u8((self.class << 4) | (self.id & 0x0F))?;
        buf.extend_from_slice(&self.counts);
        buf.extend_from_slice(&self.values);
        Ok(())
    }

    /// Parses every table packed into one DHT payload.
    pub fn parse_all(payload: &[u8]) -> CodecResult<Vec<Self>> {
        let mut cursor = Cursor::new(payload);
        let mut tables = Vec::new();

        while (cursor.position() as usize) < payload.len() {
            let selector = cursor.read_u8()?;
            let mut counts = [0u8; MAX_CODE_LEN];
            cursor.read_exact(&mut counts)?;

            let total: usize = counts.iter().map(|&c| c as usize).sum();
            if total > 256 {
                return Err(CodecError::CorruptStream(format!(
                    "Huffman table declares {} codes",
                    total
                )));
            }
            let mut values = vec![0u8; total];
            cursor.read_exact(&mut values)?;

            let spec = Self {
                class: selector >> 4,
                id: selector & 0x0F,
                counts,
                values,
            };
            spec.code_words()?;
            tables.push(spec);
        }

        Ok(tables)
    }

    /// Canonical code assignment (Annex C), as `(symbol, code, length)`.
    fn code_words(&self) -> CodecResult<Vec<(u8, u16, u8)>> {
        let mut words = Vec::with_capacity(self.values.len());
        let mut code = 0u32;
        let mut k = 0usize;

        for (len_index, &count) in self.counts.iter().enumerate() {
            let len = len_index + 1;
            for _ in 0..count {
                if code >= (1u32 << len) {
                    return Err(CodecError::CorruptStream(
                        "Huffman table is over-subscribed".into(),
                    ));
                }
                words.push((self.values[k], code as u16, len as u8));
                code += 1;
                k += 1;
            }
            code <<= 1;
        }

        Ok(words)
    }
}

fn least_frequent(freq: &[u64], exclude: Option<usize>) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &f) in freq.iter().enumerate() {
        if f == 0 || Some(i) == exclude {
            continue;
        }
        // Ties resolve to the highest index.
        match best {
            Some(b) if freq[b] < f => {}
            _ => best = Some(i),
        }
    }
    best
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HuffmanCode {
    pub bits: u16,
    pub len: u8,
}

pub struct HuffmanEncoder {
    codes: [HuffmanCode; 256],
}

impl HuffmanEncoder {
    pub fn new(spec: &HuffmanSpec) -> CodecResult<Self> {
        let mut codes = [HuffmanCode::default(); 256];
        for (symbol, bits, len) in spec.code_words()? {
            codes[symbol as usize] = HuffmanCode { bits, len };
        }
        Ok(Self { codes })
    }

    pub fn get(&self, symbol: u8) -> Option<&HuffmanCode> {
        let code = &self.codes[symbol as usize];
        (code.len > 0).then_some(code)
    }

    pub fn write(&self, writer: &mut BitWriter, symbol: u8) -> CodecResult<()> {
        let code = self.get(symbol).ok_or_else(|| {
            CodecError::EncodingFailure(format!("symbol {} has no Huffman code", symbol))
        })?;
        writer.write_bits(code.bits as u32, code.len);
        Ok(())
    }
}

/// Decoding tables of T.81 F.2.2.3.
pub struct HuffmanDecoder {
    min_code: [i32; MAX_CODE_LEN + 1],
    max_code: [i32; MAX_CODE_LEN + 1],
    val_ptr: [usize; MAX_CODE_LEN + 1],
    values: Vec<u8>,
}

impl HuffmanDecoder {
    pub fn new(spec: &HuffmanSpec) -> CodecResult<Self> {
        // Validates the code space.
        spec.code_words()?;

        let mut min_code = [0i32; MAX_CODE_LEN + 1];
        let mut max_code = [-1i32; MAX_CODE_LEN + 1];
        let mut val_ptr = [0usize; MAX_CODE_LEN + 1];

        let mut code = 0i32;
        let mut k = 0usize;
        for len in 1..=MAX_CODE_LEN {
            let count = spec.counts[len - 1] as usize;
            if count > 0 {
                val_ptr[len] = k;
                min_code[len] = code;
                code += count as i32;
                k += count;
                max_code[len] = code - 1;
            }
            code <<= 1;
        }

        Ok(Self {
            min_code,
            max_code,
            val_ptr,
            values: spec.values.clone(),
        })
    }

    pub fn decode(&self, reader: &mut BitReader) -> CodecResult<u8> {
        let mut code = reader.read_bit()? as i32;
        let mut len = 1;
        while code > self.max_code[len] {
            len += 1;
            if len > MAX_CODE_LEN {
                return Err(CodecError::CorruptStream(
                    "bit sequence matches no Huffman code".into(),
                ));
            }
            code = (code << 1) | reader.read_bit()? as i32;
        }

        let index = self.val_ptr[len] + (code - self.min_code[len]) as usize;
        Ok(self.values[index])
    }
}

/// MSB-first bit packer that stuffs a zero byte after every 0xFF.
pub struct BitWriter {
    buffer: Vec<u8>,
    bit_buffer: u32,
    bit_count: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            bit_buffer: 0,
            bit_count: 0,
        }
    }

    pub fn write_bits(&mut self, bits: u32, len: u8) {
        if len == 0 {
            return;
        }
        debug_assert!(len <= 24);
        self.bit_buffer = (self.bit_buffer << len) | (bits & ((1u32 << len) - 1));
        self.bit_count += len;

        while self.bit_count >= 8 {
            self.bit_count -= 8;
            let byte = (self.bit_buffer >> self.bit_count) as u8;
            self.push_byte(byte);
        }
        self.bit_buffer &= (1u32 << self.bit_count) - 1;
    }

    fn push_byte(&mut self, byte: u8) {
        self.buffer.push(byte);
        if byte == 0xFF {
            self.buffer.push(0x00);
        }
    }

    /// Pads the final byte with 1-bits and returns the stuffed bytes.
    pub fn finish(mut self) -> Vec<u8> {
        if self.bit_count > 0 {
            let pad = 8 - self.bit_count;
            self.write_bits((1u32 << pad) - 1, pad);
        }
        self.buffer
    }
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// MSB-first reader over entropy-coded data that has already been unstuffed.
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    pub fn read_bit(&mut self) -> CodecResult<u32> {
        let byte = *self.data.get(self.bit_pos / 8).ok_or_else(|| {
            CodecError::CorruptStream("entropy-coded data ends mid-symbol".into())
        })?;
        let bit = (byte >> (7 - (self.bit_pos % 8))) & 1;
        self.bit_pos += 1;
        Ok(bit as u32)
    }

    pub fn read_bits(&mut self, len: u8) -> CodecResult<u32> {
        let mut value = 0u32;
        for _ in 0..len {
            value = (value << 1) | self.read_bit()?;
        }
        Ok(value)
    }

    pub fn bits_remaining(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.bit_pos)
    }

    /// True once only the 1-bit padding of the last byte is left.
    pub fn at_padding(&self) -> bool {
        let remaining = self.bits_remaining();
        if remaining >= 8 {
            return false;
        }
        if remaining == 0 {
            return true;
        }
        let last = self.data[self.data.len() - 1];
        let mask = (1u8 << remaining) - 1;
        last & mask == mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frequencies(pairs: &[(u8, u32)]) -> [u32; 256] {
        let mut freq = [0u32; 256];
        for &(symbol, count) in pairs {
            freq[symbol as usize] = count;
        }
        freq
    }

    #[test]
    fn test_empty_table() {
        let spec = HuffmanSpec::from_frequencies(0, &[0; 256]);
        assert!(spec.is_empty());
        assert_eq!(spec.counts, [0; MAX_CODE_LEN]);
    }

    #[test]
    fn test_single_symbol_gets_one_bit() {
        let spec = HuffmanSpec::from_frequencies(1, &frequencies(&[(42, 9)]));
        assert_eq!(spec.counts[0], 1);
        assert_eq!(spec.values, vec![42]);
    }

    #[test]
    fn test_frequent_symbols_get_shorter_codes() {
        let spec =
            HuffmanSpec::from_frequencies(0, &frequencies(&[(1, 1000), (2, 10), (3, 10), (4, 1)]));
        assert_eq!(spec.values[0], 1);
        let encoder = HuffmanEncoder::new(&spec).unwrap();
        let common = encoder.get(1).unwrap().len;
        let rare = encoder.get(4).unwrap().len;
        assert!(common < rare);
    }

    #[test]
    fn test_lengths_are_limited_to_16() {
        // Fibonacci frequencies drive an unlimited tree past 16 levels.
        let mut freq = [0u32; 256];
        let (mut a, mut b) = (1u32, 1u32);
        for f in freq.iter_mut().take(30) {
            *f = a;
            let next = a + b;
            a = b;
            b = next;
        }
        let spec = HuffmanSpec::from_frequencies(0, &freq);
        assert_eq!(spec.values.len(), 30);
        let total: usize = spec.counts.iter().map(|&c| c as usize).sum();
        assert_eq!(total, 30);
        assert!(HuffmanDecoder::new(&spec).is_ok());
    }

    #[test]
    fn test_padding_never_decodes() {
        let spec = HuffmanSpec::from_frequencies(0, &frequencies(&[(7, 5), (9, 3), (11, 1)]));
        let decoder = HuffmanDecoder::new(&spec).unwrap();
        let ones = [0xFFu8, 0x00];
        let mut reader = BitReader::new(&ones[..1]);
        assert!(decoder.decode(&mut reader).is_err());
    }

    #[test]
    fn test_bit_stream_round_trip() {
        let spec = HuffmanSpec::from_frequencies(
            0,
            &frequencies(&[(0, 40), (1, 20), (5, 7), (200, 3), (254, 1)]),
        );
        let encoder = HuffmanEncoder::new(&spec).unwrap();
        let decoder = HuffmanDecoder::new(&spec).unwrap();

        let symbols = [0u8, 1, 0, 5, 200, 254, 0, 1, 1, 0];
        let mut writer = BitWriter::new();
        for &s in &symbols {
            encoder.write(&mut writer, s).unwrap();
            writer.write_bits(0b101, 3);
        }
        let bytes = writer.finish();

        let mut reader = BitReader::new(&bytes);
        for &s in &symbols {
            assert_eq!(decoder.decode(&mut reader).unwrap(), s);
            assert_eq!(reader.read_bits(3).unwrap(), 0b101);
        }
        assert!(reader.at_padding());
        assert!(encoder.write(&mut BitWriter::new(), 3).is_err());
    }

    #[test]
    fn test_writer_stuffs_ff() {
        let mut writer = BitWriter::new();
        writer.write_bits(0xFF, 8);
        writer.write_bits(0x1, 4);
        assert_eq!(writer.finish(), vec![0xFF, 0x00, 0x1F]);
    }

    #[test]
    fn test_dht_payload_round_trip() {
        let a = HuffmanSpec::from_frequencies(0, &frequencies(&[(3, 2), (4, 2)]));
        let b = HuffmanSpec::from_frequencies(1, &frequencies(&[(100, 1)]));
        let mut payload = Vec::new();
        a.encode(&mut payload).unwrap();
        b.encode(&mut payload).unwrap();
        assert_eq!(payload.len(), (1 + 16 + 2) + (1 + 16 + 1));

        let parsed = HuffmanSpec::parse_all(&payload).unwrap();
        assert_eq!(parsed, vec![a, b]);
    }

    #[test]
    fn test_oversubscribed_table_is_corrupt() {
        let mut payload = vec![0u8];
        let mut counts = [0u8; MAX_CODE_LEN];
        counts[0] = 3;
        payload.extend_from_slice(&counts);
        payload.extend_from_slice(&[1, 2, 3]);
        assert!(HuffmanSpec::parse_all(&payload).unwrap_err().is_corrupt());
    }
}
