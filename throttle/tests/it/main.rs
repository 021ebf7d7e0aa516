mod controller;
mod mock;
