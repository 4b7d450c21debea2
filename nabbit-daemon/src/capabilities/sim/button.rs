//! Simulated push button
//!
//! [`SimButton`] sets the level of a [`SimButtonPin`], an input pin with
//! edge waits. The pin feeds the same [`ButtonInput`] and [`ButtonMachine`]
//! a real button would, in [`run_button`].

use std::convert::Infallible;
use std::time::Duration;

use embedded_hal::digital::{ErrorType, InputPin};
use embedded_hal_async::digital::Wait;
use nabbit_core::button::ButtonMachine;
use nabbit_core::config::ButtonTiming;
use nabbit_drivers::button::ButtonInput;
use nabbit_protocol::now_timestamp;
use tokio::sync::watch;
use tracing::debug;

use crate::capabilities::Button;
use crate::channels::{Clock, HardwareEvent, HardwareSender};

/// Length of a simulated click
const CLICK_MS: u64 = 20;

/// Input pin whose level is set by a [`SimButton`]; high is pressed
pub struct SimButtonPin {
    level: watch::Receiver<bool>,
}

impl SimButtonPin {
    async fn changed(&mut self) {
        if self.level.changed().await.is_err() {
            // Nobody can press the button anymore
            std::future::pending::<()>().await;
        }
    }
}

impl ErrorType for SimButtonPin {
    type Error = Infallible;
}

impl InputPin for SimButtonPin {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(*self.level.borrow())
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(!*self.level.borrow())
    }
}

impl Wait for SimButtonPin {
    async fn wait_for_high(&mut self) -> Result<(), Infallible> {
        while !*self.level.borrow() {
            self.changed().await;
        }
        Ok(())
    }

    async fn wait_for_low(&mut self) -> Result<(), Infallible> {
        while *self.level.borrow() {
            self.changed().await;
        }
        Ok(())
    }

    async fn wait_for_rising_edge(&mut self) -> Result<(), Infallible> {
        self.wait_for_low().await?;
        self.wait_for_high().await
    }

    async fn wait_for_falling_edge(&mut self) -> Result<(), Infallible> {
        self.wait_for_high().await?;
        self.wait_for_low().await
    }

    async fn wait_for_any_edge(&mut self) -> Result<(), Infallible> {
        self.changed().await;
        Ok(())
    }
}

/// Finger on the simulated button
#[derive(Debug, Clone)]
pub struct SimButton {
    level: watch::Sender<bool>,
}

impl SimButton {
    pub fn new() -> (Self, SimButtonPin) {
        let (level, rx) = watch::channel(false);
        (Self { level }, SimButtonPin { level: rx })
    }

    pub fn press(&self) {
        self.level.send_replace(true);
    }

    pub fn release(&self) {
        self.level.send_replace(false);
    }

    /// Press and release
    pub async fn click(&self) {
        self.press();
        tokio::time::sleep(Duration::from_millis(CLICK_MS)).await;
        self.release();
        tokio::time::sleep(Duration::from_millis(CLICK_MS)).await;
    }
}

impl Button for SimButton {
    fn is_pressed(&self) -> bool {
        *self.level.borrow()
    }
}

/// Turn pin edges into button events until the daemon goes away
pub async fn run_button<P>(pin: P, active_low: bool, timing: ButtonTiming, events: HardwareSender, clock: Clock)
where
    P: InputPin + Wait,
{
    let mut input = ButtonInput::new(pin, active_low);
    let mut machine = ButtonMachine::new(timing);
    loop {
        let deadline = machine.deadline();
        let timer = async move {
            match deadline {
                Some(ms) => tokio::time::sleep_until(clock.instant_of(ms)).await,
                None => std::future::pending::<()>().await,
            }
        };
        let mut fired = heapless::Vec::<_, 2>::new();
        tokio::select! {
            edge = input.next_edge() => match edge {
                Ok(down) => fired = machine.on_edge(down, clock.now_ms()),
                Err(_) => {
                    debug!("button pin failed");
                    return;
                }
            },
            _ = timer => {
                if let Some(event) = machine.on_timer(clock.now_ms()) {
                    let _ = fired.push(event);
                }
            }
        }
        for event in fired {
            debug!("button {}", event.as_str());
            if events.send(HardwareEvent::Button(event, now_timestamp())).is_err() {
                return;
            }
        }
    }
}
