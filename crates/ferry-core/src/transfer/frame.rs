//! Frame - 実際にチャネルを通る単位
//!
//! header は JSON バイト列（deep copy）、buffers は移動のみ。

use crate::domain::{FerryError, TaskRequest, TaskResponse};

use super::buffer::TransferBuffer;

#[derive(Debug)]
pub struct Frame {
    header: Vec<u8>,
    buffers: Vec<TransferBuffer>,
}

impl Frame {
    pub fn request(request: &TaskRequest, buffers: Vec<TransferBuffer>) -> Result<Self, FerryError> {
        check_indices(&request.transfer_buffer_indices, buffers.len())?;
        Ok(Self {
            header: serde_json::to_vec(request)?,
            buffers,
        })
    }

    pub fn response(response: &TaskResponse, buffers: Vec<TransferBuffer>) -> Result<Self, FerryError> {
        check_indices(&response.result_buffer_indices, buffers.len())?;
        Ok(Self {
            header: serde_json::to_vec(response)?,
            buffers,
        })
    }

    pub fn decode_request(self) -> Result<(TaskRequest, Vec<TransferBuffer>), FerryError> {
        let request: TaskRequest = serde_json::from_slice(&self.header)?;
        check_indices(&request.transfer_buffer_indices, self.buffers.len())?;
        Ok((request, self.buffers))
    }

    pub fn decode_response(self) -> Result<(TaskResponse, Vec<TransferBuffer>), FerryError> {
        let response: TaskResponse = serde_json::from_slice(&self.header)?;
        check_indices(&response.result_buffer_indices, self.buffers.len())?;
        Ok((response, self.buffers))
    }

    /// Frame with an arbitrary header, for feeding malformed replies in tests.
    #[cfg(test)]
    pub(crate) fn raw(header: Vec<u8>, buffers: Vec<TransferBuffer>) -> Self {
        Self { header, buffers }
    }

    pub fn header_len(&self) -> usize {
        self.header.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }
}

// indices は 0..n の順で並んでいる前提（Envelope の attach 順）
fn check_indices(indices: &[usize], buffers: usize) -> Result<(), FerryError> {
    let in_order = indices.len() == buffers && indices.iter().enumerate().all(|(i, &idx)| i == idx);
    if in_order {
        Ok(())
    } else {
        Err(FerryError::InvalidTransfer(format!(
            "frame lists buffer indices {indices:?} but carries {buffers} buffers"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RequestId, TaskName, WorkerId};
    use ulid::Ulid;

    fn request(indices: Vec<usize>) -> TaskRequest {
        TaskRequest {
            id: RequestId::from_ulid(Ulid::new()),
            task_name: TaskName::new("ferry.buffer.reverse.v1"),
            payload: serde_json::json!({ "data": { "$buffer": 0 } }),
            transfer_buffer_indices: indices,
        }
    }

    #[test]
    fn request_frame_moves_buffers_and_copies_header() {
        let bytes = vec![5u8; 1024];
        let ptr = bytes.as_ptr();
        let req = request(vec![0]);

        let frame = Frame::request(&req, vec![bytes.into()]).unwrap();
        assert!(frame.header_len() < 1024);

        let (decoded, buffers) = frame.decode_request().unwrap();
        assert_eq!(decoded, req);
        assert_eq!(buffers[0].as_bytes().unwrap().as_ptr(), ptr);
    }

    #[test]
    fn mismatched_index_list_is_rejected() {
        let err = Frame::request(&request(vec![0, 1]), vec![vec![1u8].into()]).unwrap_err();
        assert!(matches!(err, FerryError::InvalidTransfer(_)));
    }

    #[test]
    fn response_frame_roundtrip() {
        let resp = TaskResponse::success(
            RequestId::from_ulid(Ulid::new()),
            WorkerId::from_ulid(Ulid::new()),
            serde_json::json!({ "out": { "$buffer": 0 } }),
            1,
        );
        let frame = Frame::response(&resp, vec![vec![1u8, 2].into()]).unwrap();
        assert_eq!(frame.buffer_count(), 1);

        let (decoded, buffers) = frame.decode_response().unwrap();
        assert_eq!(decoded, resp);
        assert_eq!(buffers[0].as_bytes().unwrap(), &[1, 2]);
    }
}
