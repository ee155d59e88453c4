use std::ops::{Index, IndexMut};

use crate::heap::Addr;
use crate::instructions::CodePtr;

/// A choice point: the machine snapshot taken by `try_me_else` and restored
/// by `retry_me_else`/`trust_me`. `bp` is the next-alternative address.
pub struct Frame {
    pub global_index: usize,
    pub e: usize,
    pub cp: CodePtr,
    pub b: usize,
    pub bp: CodePtr,
    pub tr: usize,
    pub h: usize,
    pub b0: usize,
    args: Vec<Addr>,
}

impl Frame {
    #[allow(clippy::too_many_arguments)]
    fn new(
        global_index: usize,
        e: usize,
        cp: CodePtr,
        b: usize,
        bp: CodePtr,
        tr: usize,
        h: usize,
        b0: usize,
        n: usize,
    ) -> Self {
        Frame {
            global_index,
            e,
            cp,
            b,
            bp,
            tr,
            h,
            b0,
            args: vec![Addr::HeapCell(0); n],
        }
    }

    pub fn num_args(&self) -> usize {
        self.args.len()
    }
}

pub struct OrStack(Vec<Frame>);

impl OrStack {
    pub fn new() -> Self {
        OrStack(Vec::new())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn push(
        &mut self,
        global_index: usize,
        e: usize,
        cp: CodePtr,
        b: usize,
        bp: CodePtr,
        tr: usize,
        h: usize,
        b0: usize,
        n: usize,
    ) {
        self.0
            .push(Frame::new(global_index, e, cp, b, bp, tr, h, b0, n));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `new_len` is a frame count, i.e. a value of the machine's `b`.
    pub fn truncate(&mut self, new_len: usize) {
        self.0.truncate(new_len);
    }

    pub fn clear(&mut self) {
        self.0.clear()
    }
}

impl Default for OrStack {
    fn default() -> Self {
        OrStack::new()
    }
}

impl Index<usize> for OrStack {
    type Output = Frame;

    fn index(&self, index: usize) -> &Self::Output {
        self.0.index(index)
    }
}

impl IndexMut<usize> for OrStack {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        self.0.index_mut(index)
    }
}

impl Index<usize> for Frame {
    type Output = Addr;

    fn index(&self, index: usize) -> &Self::Output {
        self.args.index(index - 1)
    }
}

impl IndexMut<usize> for Frame {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        self.args.index_mut(index - 1)
    }
}
