// automatically generated by the FlatBuffers compiler, do not modify
// source: schema/scan.fbs

#![allow(unused_imports, dead_code, clippy::all)]

use flatbuffers::{
    Allocator, FlatBufferBuilder, Follow, ForwardsUOffset, InvalidFlatbuffer, Table,
    TableUnfinishedWIPOffset, VOffsetT, Vector, Verifiable, Verifier, WIPOffset,
};

pub enum ScanOffset {}

#[derive(Copy, Clone, PartialEq)]
pub struct Scan<'a> {
    pub _tab: Table<'a>,
}

impl<'a> Follow<'a> for Scan<'a> {
    type Inner = Scan<'a>;
    #[inline]
    unsafe fn follow(buf: &'a [u8], loc: usize) -> Self::Inner {
        Self {
            _tab: unsafe { Table::new(buf, loc) },
        }
    }
}

impl<'a> Scan<'a> {
    pub const VT_TIMESTAMP: VOffsetT = 4;
    pub const VT_VALUES: VOffsetT = 6;

    #[inline]
    pub unsafe fn init_from_table(table: Table<'a>) -> Self {
        Scan { _tab: table }
    }

    #[allow(unused_mut)]
    pub fn create<'bldr: 'args, 'args: 'mut_bldr, 'mut_bldr, A: Allocator + 'bldr>(
        _fbb: &'mut_bldr mut FlatBufferBuilder<'bldr, A>,
        args: &'args ScanArgs<'args>,
    ) -> WIPOffset<Scan<'bldr>> {
        let mut builder = ScanBuilder::new(_fbb);
        if let Some(x) = args.values {
            builder.add_values(x);
        }
        if let Some(x) = args.timestamp {
            builder.add_timestamp(x);
        }
        builder.finish()
    }

    #[inline]
    pub fn timestamp(&self) -> Option<&'a str> {
        // Safety: created from a verified buffer or a trusted builder
        unsafe {
            self._tab
                .get::<ForwardsUOffset<&str>>(Scan::VT_TIMESTAMP, None)
        }
    }

    #[inline]
    pub fn values(&self) -> Option<Vector<'a, f64>> {
        // Safety: created from a verified buffer or a trusted builder
        unsafe {
            self._tab
                .get::<ForwardsUOffset<Vector<'a, f64>>>(Scan::VT_VALUES, None)
        }
    }
}

impl Verifiable for Scan<'_> {
    #[inline]
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("timestamp", Self::VT_TIMESTAMP, false)?
            .visit_field::<ForwardsUOffset<Vector<'_, f64>>>("values", Self::VT_VALUES, false)?
            .finish();
        Ok(())
    }
}

pub struct ScanArgs<'a> {
    pub timestamp: Option<WIPOffset<&'a str>>,
    pub values: Option<WIPOffset<Vector<'a, f64>>>,
}

impl<'a> Default for ScanArgs<'a> {
    #[inline]
    fn default() -> Self {
        ScanArgs {
            timestamp: None,
            values: None,
        }
    }
}

pub struct ScanBuilder<'a: 'b, 'b, A: Allocator + 'a> {
    fbb_: &'b mut FlatBufferBuilder<'a, A>,
    start_: WIPOffset<TableUnfinishedWIPOffset>,
}

impl<'a: 'b, 'b, A: Allocator + 'a> ScanBuilder<'a, 'b, A> {
    #[inline]
    pub fn add_timestamp(&mut self, timestamp: WIPOffset<&'b str>) {
        self.fbb_
            .push_slot_always::<WIPOffset<_>>(Scan::VT_TIMESTAMP, timestamp);
    }

    #[inline]
    pub fn add_values(&mut self, values: WIPOffset<Vector<'b, f64>>) {
        self.fbb_
            .push_slot_always::<WIPOffset<_>>(Scan::VT_VALUES, values);
    }

    #[inline]
    pub fn new(_fbb: &'b mut FlatBufferBuilder<'a, A>) -> ScanBuilder<'a, 'b, A> {
        let start = _fbb.start_table();
        ScanBuilder {
            fbb_: _fbb,
            start_: start,
        }
    }

    #[inline]
    pub fn finish(self) -> WIPOffset<Scan<'a>> {
        let o = self.fbb_.end_table(self.start_);
        WIPOffset::new(o.value())
    }
}

impl core::fmt::Debug for Scan<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut ds = f.debug_struct("Scan");
        ds.field("timestamp", &self.timestamp());
        ds.field("values", &self.values());
        ds.finish()
    }
}
