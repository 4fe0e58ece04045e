use bytes::Bytes;

/// A complete packet of one logical stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    data: Bytes,
    bos: bool,
    eos: bool,
    granule: i64,
    packetno: u64,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            bos: false,
            eos: false,
            granule: -1,
            packetno: 0,
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_bos(&self) -> bool {
        self.bos
    }

    pub fn is_eos(&self) -> bool {
        self.eos
    }

    /// Granule position, -1 when the packet did not end a page.
    pub fn granule(&self) -> i64 {
        self.granule
    }

    pub fn packetno(&self) -> u64 {
        self.packetno
    }

    pub fn with_granule(mut self, granule: i64) -> Self {
        self.granule = granule;
        self
    }

    pub fn with_packetno(mut self, packetno: u64) -> Self {
        self.packetno = packetno;
        self
    }

    pub fn set_bos(&mut self, bos: bool) {
        self.bos = bos;
    }

    pub fn set_eos(&mut self, eos: bool) {
        self.eos = eos;
    }
}
