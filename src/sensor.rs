use crate::attributes::Attribute;
use crate::client::{ClientOptions, Selector, TouchClient, TouchError};
use crate::transport::{Transport, UreqTransport};

/// Room temperature sensor backed by the Touch. Never writes to the device.
pub struct AmbientSensor<T: Transport = UreqTransport> {
    touch: TouchClient<T>,
}

impl AmbientSensor<UreqTransport> {
    pub fn connect(url: &str, password: &str) -> Result<Self, TouchError> {
        Ok(AmbientSensor {
            touch: TouchClient::connect(url, password, true)?,
        })
    }
}

impl<T: Transport> AmbientSensor<T> {
    /// Wrap a transport; the client is always read-only.
    pub fn new(transport: T, url: &str, password: &str) -> Result<Self, TouchError> {
        let options = ClientOptions {
            read_only: true,
            ..ClientOptions::default()
        };
        Ok(AmbientSensor {
            touch: TouchClient::new(transport, url, password, options)?,
        })
    }

    /// Fresh room temperature reading.
    pub fn temperature(&mut self) -> Result<f64, TouchError> {
        let attribute = Attribute::RoomTemperature;
        self.touch.refresh(Selector::Named(attribute.name()))?;
        self.touch.value(attribute)
    }

    pub fn touch(&self) -> &TouchClient<T> {
        &self.touch
    }

    pub fn touch_mut(&mut self) -> &mut TouchClient<T> {
        &mut self.touch
    }
}
