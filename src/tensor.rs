use crate::tensorinfo::TensorInfo;

/// A tensor descriptor paired with a handle to storage allocated elsewhere.
///
/// Operations borrow tensors; they never own or free the storage behind
/// `buffer`.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor<Buf> {
    info: TensorInfo,
    buffer: Buf,
}

impl<Buf> Tensor<Buf> {
    pub fn new(info: TensorInfo, buffer: Buf) -> Self {
        Tensor { info, buffer }
    }

    pub fn info(&self) -> &TensorInfo {
        &self.info
    }

    pub fn info_mut(&mut self) -> &mut TensorInfo {
        &mut self.info
    }

    pub fn buffer(&self) -> &Buf {
        &self.buffer
    }
}
