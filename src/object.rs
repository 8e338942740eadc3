use std::any::Any;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::types::StreamSample;

/// Payload flowing through a [`Processor`](crate::Processor) graph.
pub trait Object: Any + Send {
    /// Deep copy into a fresh box.
    fn clone_object(&self) -> Box<dyn Object>;

    /// Consume one use of this object; `false` once it is used up.
    fn dec_validity(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<'a> dyn Object + 'a {
    pub fn downcast_ref<T: Object>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Object>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// Generic payload wrapping any cloneable value.
///
/// `Packet::new` may be consumed any number of times; `Packet::once` is
/// accepted by exactly one processor. Copies start with a fresh budget.
#[derive(Debug)]
pub struct Packet<T> {
    pub value: T,
    validity: Option<AtomicI32>,
}

impl<T: Clone + Send + 'static> Packet<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            validity: None,
        }
    }

    pub fn once(value: T) -> Self {
        Self {
            value,
            validity: Some(AtomicI32::new(1)),
        }
    }
}

impl<T: Clone + Send + 'static> Object for Packet<T> {
    fn clone_object(&self) -> Box<dyn Object> {
        let validity = self.validity.as_ref().map(|_| AtomicI32::new(1));
        Box::new(Packet {
            value: self.value.clone(),
            validity,
        })
    }

    fn dec_validity(&self) -> bool {
        match &self.validity {
            Some(v) => v.fetch_sub(1, Ordering::AcqRel) > 0,
            None => true,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Left and right images of one stereo frame.
#[derive(Debug, Clone)]
pub struct StereoFrames {
    pub left: StreamSample,
    pub right: StreamSample,
}

/// Payload fed to the device-attached pipeline root.
pub type StereoObject = Packet<StereoFrames>;
