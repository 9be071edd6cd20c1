//! Serial port transport for the sensor board (e.g. /dev/ttyUSB0, COM3).

use crate::error::{TelemetryError, TelemetryResult};
use crate::telemetry::transport::{ReaderTransport, Transport};
use async_trait::async_trait;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

pub struct SerialTransport {
    port: String,
    baud_rate: u32,
    inner: Option<ReaderTransport<SerialStream>>,
}

impl SerialTransport {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            inner: None,
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self) -> TelemetryResult<()> {
        tracing::info!("Opening serial port {} at {} baud", self.port, self.baud_rate);

        let stream = tokio_serial::new(&self.port, self.baud_rate)
            .open_native_async()
            .map_err(|e| TelemetryError::Transport(format!("Failed to open {}: {e}", self.port)))?;

        self.inner = Some(ReaderTransport::new(self.describe(), stream));
        Ok(())
    }

    async fn next_chunk(&mut self) -> TelemetryResult<Option<String>> {
        match self.inner.as_mut() {
            Some(inner) => inner.next_chunk().await,
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> TelemetryResult<()> {
        if let Some(mut inner) = self.inner.take() {
            inner.close().await?;
            tracing::info!("Closed serial port {}", self.port);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("serial {}@{}", self.port, self.baud_rate)
    }
}

/// Names of the serial ports currently visible to the OS.
pub fn available_ports() -> TelemetryResult<Vec<String>> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| TelemetryError::Transport(format!("Failed to enumerate ports: {e}")))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
