//! Canonical Huffman decode trees.
//!
//! A tree is built from the 16 per-length code counts and the symbol values of a DHT-style table.
//! Nodes live in a flat arena and refer to each other by index; decoding walks from the root one
//! bit at a time (0 selects the left child, 1 the right) until it reaches a leaf.

use core::fmt;

use crate::{
    bits::BitReader,
    error::{Error, ErrorKind, Result},
    params::HuffmanTableBuffer,
};

type NodeIndex = u16;

#[derive(Clone, Copy)]
enum Node {
    Leaf(u8),
    /// Children for bit 0 and bit 1. A router lacks a child only on the all-ones path of an
    /// incomplete code.
    Router([Option<NodeIndex>; 2]),
}

/// Why a symbol could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The scan data ran out in the middle of a code.
    Exhausted,
    /// The bits read so far do not form a prefix of any code.
    InvalidCode,
}

pub struct HuffmanTree {
    nodes: Vec<Node>,
    root: NodeIndex,
}

impl HuffmanTree {
    /// Builds the tree for a canonical table.
    ///
    /// `values` lists the symbols in order of increasing code length, in transmission order within
    /// each length. A table with a single symbol yields a tree that is just a leaf, which decodes
    /// without consuming any bits.
    pub fn build(num_codes_per_length: &[u8; 16], values: &[u8]) -> Result<Self> {
        let total: usize = num_codes_per_length.iter().map(|&n| usize::from(n)).sum();
        if total == 0 {
            return Err(Error::from((
                ErrorKind::MalformedBitstream,
                "Huffman table defines no codes",
            )));
        }
        if values.len() < total {
            return Err(Error::from((
                ErrorKind::MalformedBitstream,
                format!(
                    "Huffman table defines {total} codes, but only {} values",
                    values.len()
                ),
            )));
        }

        let mut nodes = Vec::with_capacity(2 * total);
        if total == 1 {
            nodes.push(Node::Leaf(values[0]));
            return Ok(Self { nodes, root: 0 });
        }

        let mut push = |node: Node| {
            nodes.push(node);
            (nodes.len() - 1) as NodeIndex
        };

        // Work upwards from the longest codes. At each length, the leaves of that length come
        // first (they have the numerically smallest codes), followed by the routers carried up
        // from the next longer length. Consecutive pairs then share a parent one level up.
        let mut end = total;
        let mut carried: Vec<NodeIndex> = Vec::new();
        for &count in num_codes_per_length.iter().rev() {
            let start = end - usize::from(count);
            let mut level: Vec<NodeIndex> =
                values[start..end].iter().map(|&v| push(Node::Leaf(v))).collect();
            end = start;

            level.append(&mut carried);
            carried = level
                .chunks(2)
                .map(|pair| push(Node::Router([Some(pair[0]), pair.get(1).copied()])))
                .collect();
        }

        match *carried {
            [root] => Ok(Self { nodes, root }),
            _ => Err(Error::from((
                ErrorKind::MalformedBitstream,
                "Huffman table has more codes than fit in 16 bits",
            ))),
        }
    }

    /// Reads one symbol from `bits`.
    pub fn decode(&self, bits: &mut BitReader<'_>) -> Result<u8, DecodeError> {
        let mut index = self.root;
        loop {
            match self.nodes[usize::from(index)] {
                Node::Leaf(value) => return Ok(value),
                Node::Router(children) => {
                    let bit = bits.read_bit().ok_or(DecodeError::Exhausted)?;
                    index = children[usize::from(bit)].ok_or(DecodeError::InvalidCode)?;
                }
            }
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| matches!(node, Node::Leaf(_)))
            .count()
    }

    pub fn router_count(&self) -> usize {
        self.nodes.len() - self.leaf_count()
    }

    /// Returns every `(code, length, symbol)` triple, in code order.
    pub fn codes(&self) -> Vec<(u16, u8, u8)> {
        let mut out = Vec::new();
        let mut stack = vec![(self.root, 0u16, 0u8)];
        while let Some((index, code, len)) = stack.pop() {
            match self.nodes[usize::from(index)] {
                Node::Leaf(value) => out.push((code, len, value)),
                Node::Router(children) => {
                    // Push the 1-branch first so that the 0-branch is visited first.
                    for bit in [1, 0] {
                        if let Some(child) = children[bit] {
                            stack.push((child, code << 1 | bit as u16, len + 1));
                        }
                    }
                }
            }
        }
        out
    }
}

/// The DC and AC trees of both table slots (0 = luma, 1 = chroma).
///
/// Slots the client did not mark as loaded stay empty.
pub struct HuffmanTables {
    dc: [Option<HuffmanTree>; 2],
    ac: [Option<HuffmanTree>; 2],
}

impl HuffmanTables {
    pub fn from_buffer(buf: &HuffmanTableBuffer) -> Result<Self> {
        let mut dc = [None, None];
        let mut ac = [None, None];
        for (slot, table) in buf.huffman_table.iter().enumerate() {
            if buf.load_huffman_table[slot] == 0 {
                continue;
            }
            dc[slot] = Some(HuffmanTree::build(&table.num_dc_codes, &table.dc_values)?);
            ac[slot] = Some(HuffmanTree::build(&table.num_ac_codes, &table.ac_values)?);
            if let (Some(d), Some(a)) = (&dc[slot], &ac[slot]) {
                log::trace!(
                    "Huffman slot {slot}: DC {} symbols/{} routers, AC {} symbols/{} routers",
                    d.leaf_count(),
                    d.router_count(),
                    a.leaf_count(),
                    a.router_count(),
                );
            }
        }
        Ok(Self { dc, ac })
    }

    pub fn dc(&self, selector: u8) -> Result<&HuffmanTree> {
        Self::select(&self.dc, selector, "DC")
    }

    pub fn ac(&self, selector: u8) -> Result<&HuffmanTree> {
        Self::select(&self.ac, selector, "AC")
    }

    fn select<'a>(
        trees: &'a [Option<HuffmanTree>; 2],
        selector: u8,
        class: &str,
    ) -> Result<&'a HuffmanTree> {
        trees
            .get(usize::from(selector))
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                Error::from((
                    ErrorKind::MissingBuffer,
                    format!("{class} Huffman table {selector} is not loaded"),
                ))
            })
    }
}

impl fmt::Debug for HuffmanTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (code, bits, value) in self.codes() {
            writeln!(
                f,
                "{bits} {:01$b} -> {2:02x}",
                code,
                usize::from(bits),
                value,
            )?;
        }
        Ok(())
    }
}
